//! Configuration for the enum unboxing engine.

/// Default budget of instance fields an unboxed enum may keep as lookup tables.
pub const DEFAULT_MAX_RETAINED_INSTANCE_FIELDS: usize = 9;

/// Default cap on analysis rounds; the analysis normally converges much earlier.
pub const DEFAULT_MAX_ROUNDS: usize = 64;

/// Configuration for the enum unboxing engine.
///
/// Controls which transformations run and how strictly the rewritten program is
/// verified. All fields are public; start from [`UnboxingConfig::default`] or one
/// of the presets and adjust.
#[derive(Debug, Clone)]
pub struct UnboxingConfig {
    /// Run the engine at all. When disabled, [`EnumUnboxer::run`](super::EnumUnboxer::run)
    /// collects candidates but leaves the program untouched.
    pub enabled: bool,

    /// Maximum number of instance fields retained as per-ordinal lookup tables
    /// (default: 9). Fields that fold to the ordinal or to a single constant do
    /// not count.
    pub max_retained_instance_fields: usize,

    /// Replace `$SwitchMap$` indirections on unboxed enums with direct switches and
    /// drop the holder classes once unused.
    pub remove_switch_maps: bool,

    /// Downgrade verification failures of the rewritten program to warnings.
    pub allow_type_errors: bool,

    /// Accept unboxed enums whose class must survive because a keep rule names it.
    pub allow_not_pruned_unboxed_enums: bool,

    /// Record `Unboxed enums: {...}` and `Boxed enums: {...}` summary messages.
    pub debug_logs: bool,

    /// Upper bound on analysis rounds.
    pub max_rounds: usize,
}

impl Default for UnboxingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retained_instance_fields: DEFAULT_MAX_RETAINED_INSTANCE_FIELDS,
            remove_switch_maps: true,
            allow_type_errors: false,
            allow_not_pruned_unboxed_enums: false,
            debug_logs: false,
            max_rounds: DEFAULT_MAX_ROUNDS,
        }
    }
}

impl UnboxingConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a configuration that leaves every enum boxed.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Creates a configuration for tests: summary logging on, strict verification.
    #[must_use]
    pub fn testing() -> Self {
        Self {
            debug_logs: true,
            ..Self::default()
        }
    }

    /// Sets the instance-field budget.
    #[must_use]
    pub fn with_max_retained_instance_fields(mut self, max: usize) -> Self {
        self.max_retained_instance_fields = max;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        let config = UnboxingConfig::default();
        assert!(config.enabled);
        assert_eq!(config.max_retained_instance_fields, 9);
        assert!(!config.allow_type_errors);

        assert!(!UnboxingConfig::disabled().enabled);
        assert!(UnboxingConfig::testing().debug_logs);
        assert_eq!(
            UnboxingConfig::new()
                .with_max_retained_instance_fields(2)
                .max_retained_instance_fields,
            2
        );
    }
}
