use serde::Serialize;
use tracing::debug;

/// Stages of one search cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchState {
    Idle,
    Validating,
    BuildingQuery,
    Executing,
    Ranking,
    Complete,
    Error,
}

impl SearchState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }

    /// `Error` is reachable from every non-terminal state.
    pub fn can_advance_to(self, next: Self) -> bool {
        use SearchState::*;
        match (self, next) {
            (from, Error) => !from.is_terminal(),
            (Idle, Validating)
            | (Validating, BuildingQuery)
            | (BuildingQuery, Executing)
            | (Executing, Ranking)
            | (Executing, Complete)
            | (Ranking, Complete) => true,
            _ => false,
        }
    }
}

/// Tracks one pass through the state machine and the states it visited.
#[derive(Debug, Clone)]
pub struct SearchCycle {
    trail: Vec<SearchState>,
}

impl Default for SearchCycle {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchCycle {
    pub fn new() -> Self {
        Self {
            trail: vec![SearchState::Idle],
        }
    }

    pub fn state(&self) -> SearchState {
        self.trail.last().copied().unwrap_or(SearchState::Idle)
    }

    pub fn advance(&mut self, next: SearchState) {
        let from = self.state();
        debug_assert!(
            from.can_advance_to(next),
            "invalid search transition {from:?} -> {next:?}"
        );
        debug!(?from, to = ?next, "search state");
        self.trail.push(next);
    }

    /// Move to `Error` unless already terminal.
    pub fn fail(&mut self) {
        if !self.state().is_terminal() {
            self.advance(SearchState::Error);
        }
    }

    pub fn trail(&self) -> &[SearchState] {
        &self.trail
    }

    pub fn into_trail(self) -> Vec<SearchState> {
        self.trail
    }
}

#[cfg(test)]
mod tests {
    use super::SearchState::*;
    use super::*;

    #[test]
    fn happy_path_transitions() {
        let mut cycle = SearchCycle::new();
        for next in [Validating, BuildingQuery, Executing, Ranking, Complete] {
            cycle.advance(next);
        }
        assert_eq!(
            cycle.trail(),
            &[Idle, Validating, BuildingQuery, Executing, Ranking, Complete]
        );
        assert!(cycle.state().is_terminal());
    }

    #[test]
    fn zero_rows_skip_ranking() {
        assert!(Executing.can_advance_to(Complete));
        assert!(!BuildingQuery.can_advance_to(Ranking));
        assert!(!Idle.can_advance_to(Executing));
    }

    #[test]
    fn error_reachable_from_any_live_state() {
        for from in [Idle, Validating, BuildingQuery, Executing, Ranking] {
            assert!(from.can_advance_to(Error), "{from:?}");
        }
        assert!(!Complete.can_advance_to(Error));
        assert!(!Error.can_advance_to(Validating));
    }

    #[test]
    fn fail_is_idempotent() {
        let mut cycle = SearchCycle::new();
        cycle.advance(Validating);
        cycle.fail();
        cycle.fail();
        assert_eq!(cycle.into_trail(), vec![Idle, Validating, Error]);
    }
}
