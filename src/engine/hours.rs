use chrono::FixedOffset;

use crate::model::*;

use super::availability::Rejection;

/// Operating-hours gate. Fails closed: no row for the day, or a candidate not
/// fully inside the open window, is rejected.
///
/// A candidate that runs past the end of its start's local day is rejected
/// before anything else; hour rows describe a single day.
pub fn check_hours(field: &FieldState, candidate: &Span, zone: FixedOffset) -> Result<(), Rejection> {
    let day = day_window(candidate.start, zone).map_err(Rejection::InvalidInterval)?;
    if candidate.end > day.end {
        return Err(Rejection::InvalidInterval(IntervalError::CrossesMidnight));
    }
    let dow = weekday(candidate.start, zone).map_err(Rejection::InvalidInterval)?;
    match field.hours_for(dow) {
        Some(hours) if hours.window(day.start).contains_span(candidate) => Ok(()),
        _ => Err(Rejection::OutsideOperatingHours),
    }
}

/// The field's open window on the local day containing `t`, if it opens at all.
pub fn open_window(field: &FieldState, t: Ms, zone: FixedOffset) -> Result<Option<Span>, IntervalError> {
    let day = day_window(t, zone)?;
    let dow = weekday(t, zone)?;
    Ok(field.hours_for(dow).map(|h| h.window(day.start)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    /// 2024-01-01T00:00:00Z, a Monday.
    const MON: Ms = 1_704_067_200_000;
    const H: Ms = HOUR_MS;

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn field_open_monday(opens: u16, closes: u16) -> FieldState {
        let mut fs = FieldState::new(
            Ulid::new(),
            Ulid::new(),
            Ulid::new(),
            FieldSpec {
                name: "Court".into(),
                category: None,
                hourly_rate_cents: 2000,
                field_type: FieldType { name: "tennis".into(), max_players: 4 },
            },
        );
        fs.hours[0] = Some(OperatingHour { day: 0, opens, closes });
        fs
    }

    #[test]
    fn inside_hours_admitted() {
        let fs = field_open_monday(8 * 60, 22 * 60);
        assert_eq!(check_hours(&fs, &Span::new(MON + 10 * H, MON + 11 * H), utc()), Ok(()));
        // Exactly the open window.
        assert_eq!(check_hours(&fs, &Span::new(MON + 8 * H, MON + 22 * H), utc()), Ok(()));
    }

    #[test]
    fn straddling_opening_rejected() {
        let fs = field_open_monday(8 * 60, 22 * 60);
        let early = Span::new(MON + 7 * H, MON + 8 * H + 30 * MINUTE_MS);
        assert_eq!(check_hours(&fs, &early, utc()), Err(Rejection::OutsideOperatingHours));
        let late = Span::new(MON + 21 * H, MON + 22 * H + 1);
        assert_eq!(check_hours(&fs, &late, utc()), Err(Rejection::OutsideOperatingHours));
    }

    #[test]
    fn missing_day_rejects_everything() {
        let fs = field_open_monday(0, MINUTES_PER_DAY);
        let tuesday = MON + DAY_MS;
        for hour in 0..23 {
            let span = Span::new(tuesday + hour * H, tuesday + (hour + 1) * H);
            assert_eq!(check_hours(&fs, &span, utc()), Err(Rejection::OutsideOperatingHours));
        }
    }

    #[test]
    fn crossing_midnight_rejected_first() {
        // Tuesday has no hours, so the midnight check must win over the hours check.
        let fs = field_open_monday(0, MINUTES_PER_DAY);
        let span = Span::new(MON + 23 * H, MON + 25 * H);
        assert_eq!(
            check_hours(&fs, &span, utc()),
            Err(Rejection::InvalidInterval(IntervalError::CrossesMidnight))
        );
    }

    #[test]
    fn ending_at_midnight_is_same_day() {
        let fs = field_open_monday(0, MINUTES_PER_DAY);
        let span = Span::new(MON + 23 * H, MON + DAY_MS);
        assert_eq!(check_hours(&fs, &span, utc()), Ok(()));
    }

    #[test]
    fn hours_read_in_reference_zone() {
        // Open 08:00-22:00 local at +02:00 means 06:00-20:00 UTC.
        let plus2 = FixedOffset::east_opt(2 * 3600).unwrap();
        let fs = field_open_monday(8 * 60, 22 * 60);
        let ok = Span::new(MON + 6 * H, MON + 7 * H);
        assert_eq!(check_hours(&fs, &ok, plus2), Ok(()));
        let too_early = Span::new(MON + 5 * H, MON + 6 * H);
        assert_eq!(check_hours(&fs, &too_early, plus2), Err(Rejection::OutsideOperatingHours));
    }

    #[test]
    fn open_window_for_day() {
        let fs = field_open_monday(8 * 60, 22 * 60);
        assert_eq!(
            open_window(&fs, MON + 12 * H, utc()).unwrap(),
            Some(Span::new(MON + 8 * H, MON + 22 * H))
        );
        assert_eq!(open_window(&fs, MON + DAY_MS, utc()).unwrap(), None);
    }
}
