use ulid::Ulid;

use crate::model::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosureScope {
    Field,
    Location,
}

/// A closure interval clipped to the queried window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Blocked {
    pub closure_id: Ulid,
    pub scope: ClosureScope,
    pub span: Span,
}

/// Union of the field's own closures and its location's closures that
/// intersect `window`, clipped to it and ordered by start. Overlapping
/// closures are kept apart; callers test each one.
pub fn blocked_intervals(field: &FieldState, location: &LocationState, window: &Span) -> Vec<Blocked> {
    let mut blocked: Vec<Blocked> = overlapping(&field.closures, window)
        .filter_map(|c| clipped(c, ClosureScope::Field, window))
        .chain(
            overlapping(&location.closures, window)
                .filter_map(|c| clipped(c, ClosureScope::Location, window)),
        )
        .collect();
    blocked.sort_by_key(|b| b.span.start);
    blocked
}

fn clipped(closure: &Closure, scope: ClosureScope, window: &Span) -> Option<Blocked> {
    closure.span.clip(window).map(|span| Blocked {
        closure_id: closure.id,
        scope,
        span,
    })
}
