//! Toolchain collaborator
//!
//! Turns a sketch, a project directory or a precompiled file into an
//! [`Image`]. Compilation is delegated to `arduino-cli`; nothing here knows
//! how to compile C++ itself.

use std::ffi::OsStr;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{BridgeError, ToolchainError};
use crate::image::Image;

/// Board identifier passed to the compiler
pub const DEFAULT_FQBN: &str = "arduino:avr:uno";

/// Per-project list of libraries to install before compiling, one per line
pub const LIBRARIES_FILE: &str = "libraries.txt";

/// What to load into the emulator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgramSource {
    /// A single `.ino` file
    Sketch(PathBuf),
    /// A sketch directory, optionally with a `libraries.txt`
    Project(PathBuf),
    /// An already compiled `.hex` or `.bin`
    Image(PathBuf),
}

impl ProgramSource {
    /// Classify a path by what it points to
    pub fn from_path(path: impl Into<PathBuf>) -> Result<Self, ToolchainError> {
        let path = path.into();
        if path.is_dir() {
            return Ok(Self::Project(path));
        }
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("ino") => Ok(Self::Sketch(path)),
            Some("hex") | Some("bin") => Ok(Self::Image(path)),
            _ => Err(ToolchainError::InvalidSource(path)),
        }
    }

    /// Path this source was created from
    pub fn path(&self) -> &Path {
        match self {
            Self::Sketch(p) | Self::Project(p) | Self::Image(p) => p,
        }
    }
}

/// Something that can produce a machine-code image
pub trait Toolchain: Send + Sync {
    /// Build `source` into an image
    fn compile(
        &self,
        source: &ProgramSource,
    ) -> impl Future<Output = Result<Image, ToolchainError>> + Send;
}

/// `arduino-cli` driven toolchain
#[derive(Debug, Clone)]
pub struct ArduinoCli {
    binary: PathBuf,
    fqbn: String,
    extra_flags: Vec<String>,
}

impl ArduinoCli {
    /// Use `arduino-cli` from `PATH` for an Uno
    pub fn new() -> Self {
        Self {
            binary: PathBuf::from("arduino-cli"),
            fqbn: DEFAULT_FQBN.to_string(),
            extra_flags: Vec::new(),
        }
    }

    /// Use a specific compiler binary
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Pass extra compiler flags (`-DNAME=value`) via `build.extra_flags`
    pub fn with_extra_flags(mut self, flags: Vec<String>) -> Self {
        self.extra_flags = flags;
        self
    }

    async fn run(&self, args: &[&OsStr]) -> Result<(), ToolchainError> {
        let program = self.binary.display().to_string();
        debug!(program = %program, ?args, "running toolchain");

        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| ToolchainError::Spawn { program, source })?;

        if output.status.success() {
            return Ok(());
        }
        let mut diagnostic = String::from_utf8_lossy(&output.stderr).into_owned();
        if diagnostic.trim().is_empty() {
            diagnostic = String::from_utf8_lossy(&output.stdout).into_owned();
        }
        Err(ToolchainError::Failed { diagnostic })
    }

    async fn install_libraries(&self, project: &Path) -> Result<(), ToolchainError> {
        let manifest = project.join(LIBRARIES_FILE);
        let Ok(contents) = tokio::fs::read_to_string(&manifest).await else {
            return Ok(());
        };
        for library in contents
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
        {
            info!(library, "installing library");
            self.run(&[OsStr::new("lib"), OsStr::new("install"), OsStr::new(library)])
                .await?;
        }
        Ok(())
    }

    async fn compile_dir(
        &self,
        sketch_dir: &Path,
        output_dir: &Path,
    ) -> Result<Image, ToolchainError> {
        let mut args = vec![
            OsStr::new("compile"),
            OsStr::new("--fqbn"),
            OsStr::new(&self.fqbn),
            OsStr::new("--output-dir"),
            output_dir.as_os_str(),
        ];
        let property = format!("build.extra_flags={}", self.extra_flags.join(" "));
        if !self.extra_flags.is_empty() {
            args.push(OsStr::new("--build-property"));
            args.push(OsStr::new(&property));
        }
        args.push(sketch_dir.as_os_str());

        self.run(&args).await?;

        let hex = find_hex(output_dir).await?;
        Ok(Image::from_file(&hex).await?)
    }
}

impl Default for ArduinoCli {
    fn default() -> Self {
        Self::new()
    }
}

impl Toolchain for ArduinoCli {
    async fn compile(&self, source: &ProgramSource) -> Result<Image, ToolchainError> {
        let build = tempfile::tempdir()?;
        let output_dir = build.path().join("build");
        tokio::fs::create_dir_all(&output_dir).await?;

        match source {
            ProgramSource::Image(path) => Ok(Image::from_file(path).await?),
            ProgramSource::Project(dir) => {
                self.install_libraries(dir).await?;
                self.compile_dir(dir, &output_dir).await
            }
            ProgramSource::Sketch(file) => {
                // arduino-cli wants <name>/<name>.ino
                let stem = file
                    .file_stem()
                    .ok_or_else(|| ToolchainError::InvalidSource(file.clone()))?;
                let sketch_dir = build.path().join(stem);
                tokio::fs::create_dir_all(&sketch_dir).await?;
                let mut target = sketch_dir.join(stem);
                target.set_extension("ino");
                tokio::fs::copy(file, &target).await?;
                self.compile_dir(&sketch_dir, &output_dir).await
            }
        }
    }
}

/// Pick the application image out of a build directory
async fn find_hex(dir: &Path) -> Result<PathBuf, ToolchainError> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut found = None;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(".hex") && !name.contains("with_bootloader") {
            found = Some(entry.path());
            break;
        }
    }
    found.ok_or_else(|| ToolchainError::MissingOutput(dir.to_path_buf()))
}

/// Load a program, compiling it first if needed
pub async fn load_program<T: Toolchain>(
    source: &ProgramSource,
    toolchain: &T,
) -> Result<Image, BridgeError> {
    let image = match source {
        ProgramSource::Image(path) => {
            info!(path = %path.display(), "loading image");
            Image::from_file(path).await?
        }
        _ => {
            info!(path = %source.path().display(), "compiling");
            toolchain.compile(source).await?
        }
    };
    info!(bytes = image.len(), "program ready");
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TINY_HEX: &str = ":0100000001FE\n:00000001FF\n";

    struct FixedToolchain;

    impl Toolchain for FixedToolchain {
        async fn compile(&self, _source: &ProgramSource) -> Result<Image, ToolchainError> {
            Ok(Image::from_hex(TINY_HEX)?)
        }
    }

    #[test]
    fn test_source_classification() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            ProgramSource::from_path(dir.path()).unwrap(),
            ProgramSource::Project(dir.path().to_path_buf())
        );
        assert!(matches!(
            ProgramSource::from_path("blink.ino"),
            Ok(ProgramSource::Sketch(_))
        ));
        assert!(matches!(
            ProgramSource::from_path("blink.HEX"),
            Ok(ProgramSource::Image(_))
        ));
        assert!(matches!(
            ProgramSource::from_path("notes.txt"),
            Err(ToolchainError::InvalidSource(_))
        ));
    }

    #[tokio::test]
    async fn test_load_program_compiles_sketches() {
        let source = ProgramSource::Sketch(PathBuf::from("blink.ino"));
        let image = load_program(&source, &FixedToolchain).await.unwrap();
        assert_eq!(image.bytes(), &[0x01]);
    }

    #[tokio::test]
    async fn test_load_program_missing_image() {
        let source = ProgramSource::Image(PathBuf::from("/nonexistent/blink.hex"));
        let err = load_program(&source, &FixedToolchain).await.unwrap_err();
        assert!(matches!(err, BridgeError::Image(_)));
    }

    #[tokio::test]
    async fn test_missing_compiler() {
        let dir = tempfile::tempdir().unwrap();
        let sketch = dir.path().join("blink.ino");
        std::fs::write(&sketch, "void setup() {}\nvoid loop() {}\n").unwrap();

        let cli = ArduinoCli::new().with_binary(dir.path().join("no-such-arduino-cli"));
        let err = cli
            .compile(&ProgramSource::Sketch(sketch))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolchainError::Spawn { .. }));
    }

    #[cfg(unix)]
    fn fake_cli(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("arduino-cli");
        std::fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_compile_picks_application_hex() {
        let tools = tempfile::tempdir().unwrap();
        let script = format!(
            r#"
out=""
while [ $# -gt 0 ]; do
  if [ "$1" = "--output-dir" ]; then out="$2"; shift; fi
  shift
done
printf '{hex}' > "$out/sketch.ino.hex"
printf 'garbage' > "$out/sketch.ino.with_bootloader.hex"
"#,
            hex = TINY_HEX.replace('\n', "\\n")
        );
        let cli = ArduinoCli::new()
            .with_binary(fake_cli(tools.path(), &script))
            .with_extra_flags(vec!["-DLED=13".to_string()]);

        let sketch = tools.path().join("blink.ino");
        std::fs::write(&sketch, "void setup() {}\nvoid loop() {}\n").unwrap();

        let image = cli.compile(&ProgramSource::Sketch(sketch)).await.unwrap();
        assert_eq!(image.bytes(), &[0x01]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_compile_failure_carries_diagnostic() {
        let tools = tempfile::tempdir().unwrap();
        let cli = ArduinoCli::new().with_binary(fake_cli(
            tools.path(),
            "echo \"blink.ino:3: error: 'foo' was not declared\" >&2\nexit 1\n",
        ));
        let project = tools.path().join("blink");
        std::fs::create_dir(&project).unwrap();

        let err = cli
            .compile(&ProgramSource::Project(project))
            .await
            .unwrap_err();
        match err {
            ToolchainError::Failed { diagnostic } => assert!(diagnostic.contains("not declared")),
            other => panic!("unexpected {:?}", other),
        }
    }
}
