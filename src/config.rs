use crate::errors::{AppError, AppResult};
use crate::models::Platform;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const IOS_SCRIPT: &str = "detect-sdk-ios.sh";
const ANDROID_SCRIPT: &str = "detect-sdk-android.sh";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalyzerSettings {
    /// Directory holding the bundled detection scripts.
    pub scripts_dir: PathBuf,
    /// Interpreter the detection scripts are run with.
    pub shell: String,
    /// Binary used for the App Store authentication sub-flow.
    pub ipatool_binary: String,
    /// Directories prepended to the inherited PATH so locally installed
    /// tools are found regardless of how the host app was launched.
    pub path_prefixes: Vec<String>,
    /// Tells the detection script to skip its own redundant auth probe.
    pub skip_auth_check: bool,
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self {
            scripts_dir: PathBuf::from("scripts"),
            shell: "/bin/bash".to_string(),
            ipatool_binary: "ipatool".to_string(),
            path_prefixes: vec![
                "/opt/homebrew/bin".to_string(),
                "/usr/local/bin".to_string(),
            ],
            skip_auth_check: true,
        }
    }
}

impl AnalyzerSettings {
    pub fn script_name(platform: Platform) -> &'static str {
        match platform {
            Platform::Ios => IOS_SCRIPT,
            Platform::Android => ANDROID_SCRIPT,
        }
    }

    pub fn resolve_script(&self, platform: Platform) -> AppResult<PathBuf> {
        let path = self.scripts_dir.join(Self::script_name(platform));
        if !Path::new(&path).is_file() {
            return Err(AppError::Launch(format!(
                "Could not find analysis script: {}",
                path.display()
            )));
        }
        Ok(path)
    }
}
