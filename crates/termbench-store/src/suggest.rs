use termbench_model::StrWithPos;

use crate::error::StoreError;

/// Autocomplete seam. The provider receives the current command line with
/// its cursor position; concrete backends plug in from outside the core.
pub trait SuggestionProvider: Send + Sync {
    fn get_suggestions(&self, cmd_str: StrWithPos) -> Result<(), StoreError>;
}

/// Default provider: accepts everything, suggests nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSuggestionProvider;

impl SuggestionProvider for NoopSuggestionProvider {
    fn get_suggestions(&self, cmd_str: StrWithPos) -> Result<(), StoreError> {
        if cmd_str.str.is_empty() {
            return Ok(());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_provider_accepts_any_input() {
        let provider = NoopSuggestionProvider;
        provider
            .get_suggestions(StrWithPos::default())
            .expect("empty input");
        provider
            .get_suggestions(StrWithPos {
                str: "git sta".to_owned(),
                pos: 7,
            })
            .expect("non-empty input");
    }
}
