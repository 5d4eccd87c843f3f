#[derive(Debug, Default, Clone)]
pub struct RuntimeCreateInfo {
    pub name: Option<String>,
    // appended to the original class name, default "+Shadow"
    pub shadow_suffix: Option<String>,
    // nested sends allowed per thread before StackOverflow
    pub max_dispatch_depth: Option<usize>,
    // post DID_INSTALL_OVERRIDE / DID_REMOVE_OVERRIDE
    pub notify_overrides: Option<bool>,
    pub check_arity: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub name: String,
    pub shadow_suffix: String,
    pub max_dispatch_depth: usize,
    pub notify_overrides: bool,
    pub check_arity: bool,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            name: "overlay".to_owned(),
            shadow_suffix: "+Shadow".to_owned(),
            max_dispatch_depth: 512,
            notify_overrides: false,
            check_arity: true,
        }
    }
}

impl From<RuntimeCreateInfo> for RuntimeSettings {
    fn from(info: RuntimeCreateInfo) -> Self {
        let mut settings = RuntimeSettings::default();
        info.name.inspect(|val| settings.name = val.clone());
        info.shadow_suffix
            .filter(|val| !val.is_empty())
            .inspect(|val| settings.shadow_suffix = val.clone());
        info.max_dispatch_depth
            .inspect(|&val| settings.max_dispatch_depth = val.max(1));
        info.notify_overrides
            .inspect(|&val| settings.notify_overrides = val);
        info.check_arity.inspect(|&val| settings.check_arity = val);
        settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let settings = RuntimeSettings::from(RuntimeCreateInfo::default());
        assert_eq!(settings, RuntimeSettings::default());
        assert_eq!(settings.shadow_suffix, "+Shadow");
        assert_eq!(settings.max_dispatch_depth, 512);
    }

    #[test]
    fn overrides_and_clamping() {
        let settings = RuntimeSettings::from(RuntimeCreateInfo {
            name: Some("test".into()),
            shadow_suffix: Some(String::new()),
            max_dispatch_depth: Some(0),
            notify_overrides: Some(true),
            check_arity: Some(false),
        });
        assert_eq!(settings.name, "test");
        assert_eq!(settings.shadow_suffix, "+Shadow");
        assert_eq!(settings.max_dispatch_depth, 1);
        assert!(settings.notify_overrides);
        assert!(!settings.check_arity);
    }
}
