//! Static per-language execution profiles.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Languages the sandbox can execute.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Javascript,
    C,
    Cpp,
    Java,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("unsupported language: {0}")]
pub struct UnknownLanguage(pub String);

impl Language {
    pub const ALL: [Language; 5] = [
        Language::Python,
        Language::Javascript,
        Language::C,
        Language::Cpp,
        Language::Java,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Javascript => "javascript",
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Java => "java",
        }
    }

    pub fn profile(&self) -> &'static LanguageProfile {
        match self {
            Language::Python => &PYTHON,
            Language::Javascript => &JAVASCRIPT,
            Language::C => &C,
            Language::Cpp => &CPP,
            Language::Java => &JAVA,
        }
    }
}

impl FromStr for Language {
    type Err = UnknownLanguage;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "python" => Ok(Language::Python),
            "javascript" => Ok(Language::Javascript),
            "c" => Ok(Language::C),
            "cpp" | "c++" => Ok(Language::Cpp),
            "java" => Ok(Language::Java),
            other => Err(UnknownLanguage(other.to_string())),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How one language is staged and executed inside the container.
#[derive(Clone, Debug)]
pub struct LanguageProfile {
    /// Source filename written into the workspace root.
    pub filename: &'static str,
    /// Environment variable that overrides the container image.
    pub image_env: &'static str,
    pub default_image: &'static str,
    /// Shell snippet run before `execute` (e.g. dependency install).
    pub preamble: Option<&'static str>,
    /// Shell snippet that launches the program.
    pub execute: &'static str,
    /// Whether a `requirements.txt` is honored for this language.
    pub supports_requirements: bool,
}

impl LanguageProfile {
    /// Container image, honoring the per-language environment override.
    pub fn resolved_image(&self) -> String {
        std::env::var(self.image_env)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| self.default_image.to_string())
    }

    /// Full shell command executed inside the container.
    pub fn shell_command(&self) -> String {
        let mut parts = vec!["set -euo pipefail"];
        if let Some(preamble) = self.preamble {
            parts.push(preamble);
        }
        parts.push(self.execute);
        parts.join(" && ")
    }
}

static PYTHON: LanguageProfile = LanguageProfile {
    filename: "main.py",
    image_env: "SANDBOX_IMAGE_PYTHON",
    default_image: "python:3.10-slim",
    preamble: Some(
        "if [ -f requirements.txt ] && [ -s requirements.txt ]; then \
         pip install --no-cache-dir -r requirements.txt; fi",
    ),
    execute: "python /workspace/main.py",
    supports_requirements: true,
};

static JAVASCRIPT: LanguageProfile = LanguageProfile {
    filename: "main.js",
    image_env: "SANDBOX_IMAGE_NODE",
    default_image: "node:20-bullseye",
    preamble: None,
    execute: "node /workspace/main.js",
    supports_requirements: false,
};

static C: LanguageProfile = LanguageProfile {
    filename: "main.c",
    image_env: "SANDBOX_IMAGE_C",
    default_image: "gcc:13",
    preamble: None,
    execute: "gcc main.c -std=c11 -O2 -o main && ./main",
    supports_requirements: false,
};

static CPP: LanguageProfile = LanguageProfile {
    filename: "main.cpp",
    image_env: "SANDBOX_IMAGE_CPP",
    default_image: "gcc:13",
    preamble: None,
    execute: "g++ main.cpp -std=c++17 -O2 -o main && ./main",
    supports_requirements: false,
};

static JAVA: LanguageProfile = LanguageProfile {
    filename: "Main.java",
    image_env: "SANDBOX_IMAGE_JAVA",
    default_image: "openjdk:21-slim",
    preamble: None,
    execute: "javac Main.java && java Main",
    supports_requirements: false,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_language_case_insensitively() {
        for lang in Language::ALL {
            assert_eq!(lang.as_str().parse::<Language>().unwrap(), lang);
            assert_eq!(
                lang.as_str().to_uppercase().parse::<Language>().unwrap(),
                lang
            );
        }
        assert_eq!("c++".parse::<Language>().unwrap(), Language::Cpp);
    }

    #[test]
    fn rejects_unknown_language() {
        let err = "rust".parse::<Language>().unwrap_err();
        assert_eq!(err, UnknownLanguage("rust".into()));
    }

    #[test]
    fn python_profile_supports_requirements() {
        let profile = Language::Python.profile();
        assert_eq!(profile.filename, "main.py");
        assert!(profile.supports_requirements);
        assert!(profile.preamble.unwrap().contains("pip install"));
    }

    #[test]
    fn shell_command_starts_strict_and_chains_preamble() {
        let cmd = Language::Python.profile().shell_command();
        assert!(cmd.starts_with("set -euo pipefail && if [ -f requirements.txt ]"));
        assert!(cmd.ends_with("python /workspace/main.py"));

        let cmd = Language::Java.profile().shell_command();
        assert_eq!(cmd, "set -euo pipefail && javac Main.java && java Main");
    }

    #[test]
    fn serde_round_trips_lowercase_names() {
        let json = serde_json::to_string(&Language::Cpp).unwrap();
        assert_eq!(json, "\"cpp\"");
        let back: Language = serde_json::from_str("\"javascript\"").unwrap();
        assert_eq!(back, Language::Javascript);
    }
}
