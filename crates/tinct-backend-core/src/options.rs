use std::fmt;

use tinct_transform::{
    BindingRemapperConfig, DataMap, MultiplanarExternalTextureConfig, SingleEntryPointConfig,
    SubstituteOverrideConfig,
};

/// Options every backend understands.
#[derive(Clone, Debug, Default)]
pub struct CommonOptions {
    /// Skip the index and texel clamping pass.
    pub disable_robustness: bool,
    /// Skip zero-initialization of workgroup memory.
    pub disable_workgroup_init: bool,
    /// Binding point and access remapping applied before printing.
    pub binding_remapper: BindingRemapperConfig,
    /// Where the planes and parameters of each `texture_external` go.
    pub external_texture_bindings: MultiplanarExternalTextureConfig,
    /// Override values by id or by name.
    pub overrides: SubstituteOverrideConfig,
    /// Entry point to keep. `None` keeps every entry point.
    pub entry_point: Option<String>,
}

impl CommonOptions {
    /// Stores the configuration consumed by the shared passes in `inputs`.
    pub fn populate(&self, inputs: &mut DataMap) {
        inputs
            .insert(self.binding_remapper.clone())
            .insert(self.external_texture_bindings.clone())
            .insert(self.overrides.clone());
        if let Some(entry_point) = &self.entry_point {
            inputs.insert(SingleEntryPointConfig {
                entry_point: entry_point.clone(),
            });
        }
    }
}

/// GLSL language version, e.g. `310 es` or `450`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GlslVersion {
    /// Major version.
    pub major: u32,
    /// Minor version.
    pub minor: u32,
    /// OpenGL ES dialect.
    pub es: bool,
}

impl GlslVersion {
    /// GLSL ES 3.10.
    pub const ES_310: Self = Self {
        major: 3,
        minor: 1,
        es: true,
    };

    /// Desktop GLSL 4.50.
    pub const DESKTOP_450: Self = Self {
        major: 4,
        minor: 5,
        es: false,
    };

    /// Builds a version from its `#version` number (`310`, `450`).
    pub fn from_number(number: u32, es: bool) -> Self {
        Self {
            major: number / 100,
            minor: number % 100 / 10,
            es,
        }
    }

    /// The `#version` number.
    pub fn number(self) -> u32 {
        self.major * 100 + self.minor * 10
    }

    /// Returns `true` if this version is at least `major.minor`.
    pub fn is_at_least(self, major: u32, minor: u32) -> bool {
        (self.major, self.minor) >= (major, minor)
    }
}

impl Default for GlslVersion {
    fn default() -> Self {
        Self::ES_310
    }
}

impl fmt::Display for GlslVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#version {}", self.number())?;
        if self.es {
            f.write_str(" es")?;
        }
        Ok(())
    }
}

/// Options passed to [`Backend::compile`](crate::Backend::compile).
#[derive(Clone, Debug, Default)]
pub struct BackendOptions {
    /// Options shared by every target.
    pub common: CommonOptions,
    /// GLSL version number requested on the command line. The dialect
    /// (ES or desktop) comes from the target.
    pub glsl_version: Option<u32>,
    /// Attach a dump of the sanitized module to the output.
    pub emit_ir: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glsl_version_display() {
        assert_eq!(GlslVersion::ES_310.to_string(), "#version 310 es");
        assert_eq!(GlslVersion::from_number(450, false).to_string(), "#version 450");
        assert_eq!(GlslVersion::from_number(300, true), GlslVersion {
            major: 3,
            minor: 0,
            es: true
        });
        assert!(GlslVersion::ES_310.is_at_least(3, 1));
        assert!(!GlslVersion::ES_310.is_at_least(3, 2));
    }

    #[test]
    fn populate_only_sets_entry_point_when_selected() {
        let mut data = DataMap::new();
        CommonOptions::default().populate(&mut data);
        assert!(data.contains::<BindingRemapperConfig>());
        assert!(!data.contains::<SingleEntryPointConfig>());

        let opts = CommonOptions {
            entry_point: Some("main".into()),
            ..CommonOptions::default()
        };
        let mut data = DataMap::new();
        opts.populate(&mut data);
        assert_eq!(
            data.get::<SingleEntryPointConfig>().map(|c| c.entry_point.as_str()),
            Some("main")
        );
    }
}
