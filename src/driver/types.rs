use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config;

/// Terminal geometry in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TerminalSize {
    pub cols: u16,
    pub rows: u16,
}

impl TerminalSize {
    /// 80x24, the classic VT100 screen
    pub const COMPACT: TerminalSize = TerminalSize { cols: 80, rows: 24 };
    /// 120x40
    pub const STANDARD: TerminalSize = TerminalSize { cols: 120, rows: 40 };
    /// 160x50
    pub const LARGE: TerminalSize = TerminalSize { cols: 160, rows: 50 };
    /// 200x60
    pub const EXTRA_LARGE: TerminalSize = TerminalSize { cols: 200, rows: 60 };

    pub fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }

    /// Parse a preset name (`compact`, `standard`, `large`, `xl`) or `WxH`.
    pub fn parse(s: &str) -> Option<Self> {
        config::parse_terminal_size(s).map(|(cols, rows)| Self { cols, rows })
    }
}

impl Default for TerminalSize {
    fn default() -> Self {
        let terminal = &config::get().terminal;
        Self {
            cols: terminal.width,
            rows: terminal.height,
        }
    }
}

impl fmt::Display for TerminalSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.cols, self.rows)
    }
}

/// The application a capture drives: a program, its arguments and a screen size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSource {
    program: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    name: Option<String>,
    size: TerminalSize,
}

impl AppSource {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            name: None,
            size: TerminalSize::default(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Override the display name used for artifact directories.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn size(mut self, size: TerminalSize) -> Self {
        self.size = size;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    pub fn terminal_size(&self) -> TerminalSize {
        self.size
    }

    /// Human name: the explicit name, else the program's file stem.
    pub fn display_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        Path::new(&self.program)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "app".to_string())
    }

    /// Stable identity used in cache fingerprints.
    pub fn identity(&self) -> String {
        let mut id = self.program.clone();
        for arg in &self.args {
            id.push('\u{1f}');
            id.push_str(arg);
        }
        id
    }
}

/// Artifact encodings a driver can export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactFormat {
    Vector,
    Raster,
}

impl ArtifactFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ArtifactFormat::Vector => "svg",
            ArtifactFormat::Raster => "png",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "svg" => Some(ArtifactFormat::Vector),
            "png" => Some(ArtifactFormat::Raster),
            _ => None,
        }
    }
}

impl fmt::Display for ArtifactFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ArtifactFormat::Vector => "vector",
            ArtifactFormat::Raster => "raster",
        })
    }
}

/// A file a driver wrote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub format: ArtifactFormat,
    pub path: PathBuf,
    pub size_bytes: u64,
}

impl Artifact {
    /// Describe a file already on disk.
    pub fn from_file(format: ArtifactFormat, path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let size_bytes = std::fs::metadata(&path)?.len();
        Ok(Self {
            format,
            path,
            size_bytes,
        })
    }
}
