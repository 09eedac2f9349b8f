use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Target platforms a patch pak can be built for.
///
/// Names follow the engine's cooked-platform directory names, which is also
/// what appears in output paths and in the pak info manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Platform {
    WindowsNoEditor,
    WindowsClient,
    WindowsServer,
    LinuxNoEditor,
    LinuxServer,
    MacNoEditor,
    #[serde(rename = "IOS")]
    Ios,
    #[serde(rename = "Android_ASTC")]
    AndroidAstc,
    #[serde(rename = "Android_ETC2")]
    AndroidEtc2,
}

impl Platform {
    pub const ALL: [Platform; 9] = [
        Platform::WindowsNoEditor,
        Platform::WindowsClient,
        Platform::WindowsServer,
        Platform::LinuxNoEditor,
        Platform::LinuxServer,
        Platform::MacNoEditor,
        Platform::Ios,
        Platform::AndroidAstc,
        Platform::AndroidEtc2,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Platform::WindowsNoEditor => "WindowsNoEditor",
            Platform::WindowsClient => "WindowsClient",
            Platform::WindowsServer => "WindowsServer",
            Platform::LinuxNoEditor => "LinuxNoEditor",
            Platform::LinuxServer => "LinuxServer",
            Platform::MacNoEditor => "MacNoEditor",
            Platform::Ios => "IOS",
            Platform::AndroidAstc => "Android_ASTC",
            Platform::AndroidEtc2 => "Android_ETC2",
        }
    }

    /// Shader formats whose `GlobalShaderCache-<format>.bin` ships with this platform.
    pub fn shader_formats(self) -> &'static [&'static str] {
        match self {
            Platform::WindowsNoEditor | Platform::WindowsClient | Platform::WindowsServer => {
                &["PCD3D_SM5"]
            }
            Platform::LinuxNoEditor | Platform::LinuxServer => &["SF_VULKAN_SM5"],
            Platform::MacNoEditor => &["SF_METAL_SM5"],
            Platform::Ios => &["SF_METAL"],
            Platform::AndroidAstc | Platform::AndroidEtc2 => &["GLSL_ES3_1_ANDROID"],
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownPlatform(pub String);

impl fmt::Display for UnknownPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown platform: {}", self.0)
    }
}

impl std::error::Error for UnknownPlatform {}

impl FromStr for Platform {
    type Err = UnknownPlatform;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Platform::ALL
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownPlatform(s.to_string()))
    }
}
