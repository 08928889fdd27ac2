mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use godata_core::{
    Algorithm, DEFAULT_COLLECTION, ExportOptions, LocalBackend, ProjectHandle, ProjectId,
    ProjectManager, ProjectTree, Retrieved, Value, archive_entries,
};
use output::{
    CollectionsOutput, CreateOutput, ExportOutput, GcOutput, GetData, GetOutput, InitOutput,
    LinkOutput, LsOutput, MvOutput, OutputWriter, ProjectEntry, ProjectInfo, ProjectsOutput,
    RemoveOutput, RmOutput, StoreOutput,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const HOME_ENV: &str = "GODATA_HOME";
const FALLBACK_HOME: &str = ".godata";

/// Godata - named project trees for data files
#[derive(Parser)]
#[command(name = "godata")]
#[command(about = "Manage projects of data files and export them as archives", long_about = None)]
#[command(version)]
struct Cli {
    /// Backend home directory (defaults to GODATA_HOME, then the platform data dir)
    #[arg(long, global = true, env = HOME_ENV)]
    home: Option<PathBuf>,

    /// Collection the project belongs to
    #[arg(short, long, global = true)]
    collection: Option<String>,

    /// Output results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the backend home
    Init {
        /// Hash algorithm for internal objects
        #[arg(long, default_value = "blake3")]
        algo: String,
    },

    /// Create a new, empty project
    Create {
        name: String,

        /// Keep the project's files under this directory
        #[arg(long)]
        root: Option<PathBuf>,
    },

    /// Remove a project and all of its data
    Remove {
        name: String,

        /// Confirm the removal
        #[arg(long)]
        force: bool,
    },

    /// List projects in a collection
    Projects {
        /// Include hidden projects
        #[arg(short, long)]
        all: bool,

        /// Show storage root and creation time
        #[arg(short, long)]
        long: bool,
    },

    /// List collections
    Collections {
        /// Include hidden collections
        #[arg(short, long)]
        all: bool,
    },

    /// List the files and folders at a project path
    Ls {
        project: String,

        /// Folder to list (defaults to the project root)
        path: Option<String>,
    },

    /// Store a file into a project through its codec
    Store {
        project: String,

        /// Project path to store at
        path: String,

        /// File to read
        file: PathBuf,

        /// Copy the file's bytes as-is instead of decoding it
        #[arg(long)]
        raw: bool,
    },

    /// Link an existing file or directory into a project
    Link {
        project: String,

        /// Real file or directory
        target: PathBuf,

        /// Project path to link at
        path: String,

        /// Link a directory's files at every depth
        #[arg(short, long)]
        recursive: bool,
    },

    /// Print a stored value, or its real path
    Get {
        project: String,

        path: String,

        /// Print the real file path instead of the value
        #[arg(long)]
        as_path: bool,
    },

    /// Remove a file or folder from a project
    Rm {
        project: String,

        path: String,

        /// Remove a non-empty folder
        #[arg(short, long)]
        recursive: bool,
    },

    /// Move a file to a new project path
    Mv {
        project: String,

        from: String,

        to: String,

        /// Replace an existing file at the destination
        #[arg(long)]
        force: bool,
    },

    /// Export a project to <name>.tar.zst
    Export {
        project: String,

        /// Directory to write the archive into (defaults to the current directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Create a project from an exported archive
    Import {
        archive: PathBuf,

        /// Name of the new project
        name: String,

        /// Keep the project's files under this directory
        #[arg(long)]
        root: Option<PathBuf>,
    },

    /// Delete objects no longer referenced by a project
    Gc {
        project: String,

        /// Dry run - show what would be deleted without deleting
        #[arg(long)]
        dry_run: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let out = OutputWriter::new(cli.json);
    match run(cli, &out) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let core = e
                .chain()
                .find_map(|cause| cause.downcast_ref::<godata_core::Error>());
            let code = core.map_or(1, |err| err.kind().exit_code());
            out.write_error(&e, code, core.map(|err| err.kind().as_str()));
            ExitCode::from(code)
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Backend home: `--home` or GODATA_HOME, then the platform data dir, then ./.godata.
fn resolve_home(flag: Option<PathBuf>) -> PathBuf {
    flag.or_else(|| {
        directories::ProjectDirs::from("", "", "godata").map(|dirs| dirs.data_dir().to_path_buf())
    })
    .unwrap_or_else(|| PathBuf::from(FALLBACK_HOME))
}

/// Everything a command needs once the home is open.
struct Session {
    backend: Arc<LocalBackend>,
    manager: ProjectManager,
    collection: Option<String>,
}

impl Session {
    fn open(home: &Path, collection: Option<String>) -> Result<Self> {
        let backend = Arc::new(LocalBackend::open(home).with_context(|| {
            format!(
                "Failed to open godata home at {} (run `godata init` first)",
                home.display()
            )
        })?);
        let manager = ProjectManager::new(backend.clone());
        Ok(Self {
            backend,
            manager,
            collection,
        })
    }

    fn collection(&self) -> Option<&str> {
        self.collection.as_deref()
    }

    fn collection_name(&self) -> String {
        self.collection
            .clone()
            .unwrap_or_else(|| DEFAULT_COLLECTION.to_string())
    }

    fn info(&self, name: &str) -> ProjectInfo {
        ProjectInfo {
            collection: self.collection_name(),
            name: name.to_string(),
        }
    }

    fn load(&self, name: &str) -> Result<ProjectHandle> {
        self.manager
            .load(name, self.collection())
            .with_context(|| format!("Failed to load project: {}", name))
    }
}

fn run(cli: Cli, out: &OutputWriter) -> Result<()> {
    let home = resolve_home(cli.home);
    debug!(home = %home.display(), "Resolved backend home");

    if let Commands::Init { algo } = &cli.command {
        return cmd_init(out, &home, algo);
    }

    let session = Session::open(&home, cli.collection)?;
    match cli.command {
        Commands::Init { .. } => Ok(()),
        Commands::Create { name, root } => cmd_create(out, &session, &name, root.as_deref()),
        Commands::Remove { name, force } => cmd_remove(out, &session, &name, force),
        Commands::Projects { all, long } => cmd_projects(out, &session, all, long),
        Commands::Collections { all } => cmd_collections(out, &session, all),
        Commands::Ls { project, path } => cmd_ls(out, &session, &project, path.as_deref()),
        Commands::Store {
            project,
            path,
            file,
            raw,
        } => cmd_store(out, &session, &project, &path, &file, raw),
        Commands::Link {
            project,
            target,
            path,
            recursive,
        } => cmd_link(out, &session, &project, &target, &path, recursive),
        Commands::Get {
            project,
            path,
            as_path,
        } => cmd_get(out, &session, &project, &path, as_path),
        Commands::Rm {
            project,
            path,
            recursive,
        } => cmd_rm(out, &session, &project, &path, recursive),
        Commands::Mv {
            project,
            from,
            to,
            force,
        } => cmd_mv(out, &session, &project, &from, &to, force),
        Commands::Export { project, output } => cmd_export(out, &session, &project, output),
        Commands::Import {
            archive,
            name,
            root,
        } => cmd_import(out, &session, &archive, &name, root.as_deref()),
        Commands::Gc { project, dry_run } => cmd_gc(out, &session, &project, dry_run),
    }
}

fn cmd_init(out: &OutputWriter, home: &Path, algo: &str) -> Result<()> {
    let algorithm = match algo {
        "blake3" | "blake3-256" => Algorithm::Blake3,
        _ => anyhow::bail!("Unsupported algorithm: {}", algo),
    };

    let backend = LocalBackend::init(home, algorithm)
        .with_context(|| format!("Failed to initialize godata home at {}", home.display()))?;

    let data = InitOutput {
        success: true,
        result_code: 0,
        home: backend.home().display().to_string(),
        algorithm: backend.algorithm().as_str().to_string(),
    };
    out.write(&data, || {
        format!(
            "Initialized godata home at {}\nAlgorithm: {}\n",
            data.home, data.algorithm
        )
    })
}

fn cmd_create(out: &OutputWriter, session: &Session, name: &str, root: Option<&Path>) -> Result<()> {
    let handle = match root {
        Some(root) => session.manager.create_at(name, session.collection(), root),
        None => session.manager.create(name, session.collection()),
    }
    .with_context(|| format!("Failed to create project: {}", name))?;

    let data = CreateOutput {
        success: true,
        result_code: 0,
        project: session.info(name),
        root: handle.root()?.display().to_string(),
        files: None,
    };
    out.write(&data, || {
        format!("Created project {} at {}\n", handle.id(), data.root)
    })
}

fn cmd_remove(out: &OutputWriter, session: &Session, name: &str, force: bool) -> Result<()> {
    session
        .manager
        .remove(name, session.collection(), force)
        .with_context(|| format!("Failed to remove project: {}", name))?;

    let data = RemoveOutput {
        success: true,
        result_code: 0,
        project: session.info(name),
    };
    out.write(&data, || format!("Removed project {}\n", name))
}

fn cmd_projects(out: &OutputWriter, session: &Session, all: bool, long: bool) -> Result<()> {
    let collection = session.collection_name();
    let names = session
        .manager
        .list(Some(&collection), all)
        .with_context(|| format!("Failed to list projects in collection: {}", collection))?;

    let mut projects = Vec::with_capacity(names.len());
    for name in names {
        let record = if long {
            let id = ProjectId::new(&collection, &name)?;
            Some(session.backend.record(&id)?)
        } else {
            None
        };
        projects.push(ProjectEntry {
            name,
            root: record.as_ref().map(|r| r.root.display().to_string()),
            created_at: record.map(|r| r.created_at),
        });
    }

    let data = ProjectsOutput {
        success: true,
        result_code: 0,
        collection,
        projects,
    };
    out.write(&data, || {
        if data.projects.is_empty() {
            return format!("No projects in collection {}\n", data.collection);
        }
        let mut text = String::new();
        for entry in &data.projects {
            match (&entry.created_at, &entry.root) {
                (Some(created), Some(root)) => text.push_str(&format!(
                    "{} {} {}\n",
                    created.format("%Y-%m-%d %H:%M:%S"),
                    entry.name,
                    root
                )),
                _ => text.push_str(&format!("{}\n", entry.name)),
            }
        }
        text
    })
}

fn cmd_collections(out: &OutputWriter, session: &Session, all: bool) -> Result<()> {
    let collections = session
        .manager
        .list_collections(all)
        .context("Failed to list collections")?;

    let data = CollectionsOutput {
        success: true,
        result_code: 0,
        collections,
    };
    out.write(&data, || {
        data.collections
            .iter()
            .map(|name| format!("{}\n", name))
            .collect()
    })
}

fn cmd_ls(out: &OutputWriter, session: &Session, project: &str, path: Option<&str>) -> Result<()> {
    let handle = session.load(project)?;
    let listing = handle
        .list(path)
        .with_context(|| format!("Failed to list {}:{}", project, path.unwrap_or_default()))?;

    let data = LsOutput {
        success: true,
        result_code: 0,
        project: session.info(project),
        path: path.unwrap_or_default().to_string(),
        listing,
    };
    out.write(&data, || {
        let mut text = String::new();
        for folder in &data.listing.folders {
            text.push_str(&format!("{}/\n", folder));
        }
        for file in &data.listing.files {
            text.push_str(&format!("{}\n", file));
        }
        text
    })
}

fn cmd_store(
    out: &OutputWriter,
    session: &Session,
    project: &str,
    path: &str,
    file: &Path,
    raw: bool,
) -> Result<()> {
    let handle = session.load(project)?;
    if raw {
        handle.import_file(file, path)
    } else {
        handle.store(&Value::Path(file.to_path_buf()), path)
    }
    .with_context(|| {
        let hint = if raw { "" } else { " (use --raw to copy it as-is)" };
        format!("Failed to store {} at {}{}", file.display(), path, hint)
    })?;

    let data = StoreOutput {
        success: true,
        result_code: 0,
        project: session.info(project),
        path: path.to_string(),
        source: file.display().to_string(),
        raw,
    };
    out.write(&data, || format!("Stored {} at {}\n", data.source, data.path))
}

fn cmd_link(
    out: &OutputWriter,
    session: &Session,
    project: &str,
    target: &Path,
    path: &str,
    recursive: bool,
) -> Result<()> {
    let handle = session.load(project)?;
    let linked = if target.is_dir() {
        handle
            .link_folder(target, path, recursive)
            .with_context(|| format!("Failed to link directory {}", target.display()))?
            .iter()
            .map(ToString::to_string)
            .collect()
    } else {
        handle
            .link(target, path)
            .with_context(|| format!("Failed to link {}", target.display()))?;
        vec![path.to_string()]
    };

    let data = LinkOutput {
        success: true,
        result_code: 0,
        project: session.info(project),
        target: target.display().to_string(),
        linked,
    };
    out.write(&data, || {
        data.linked
            .iter()
            .map(|p| format!("Linked {}\n", p))
            .collect()
    })
}

fn cmd_get(
    out: &OutputWriter,
    session: &Session,
    project: &str,
    path: &str,
    as_path: bool,
) -> Result<()> {
    let handle = session.load(project)?;
    let retrieved = handle
        .get(path, as_path)
        .with_context(|| format!("Failed to get {}:{}", project, path))?;

    let data = GetOutput {
        success: true,
        result_code: 0,
        project: session.info(project),
        path: path.to_string(),
        data: match &retrieved {
            Retrieved::Value(value) => GetData::from_value(value),
            Retrieved::Path(real) => GetData::Path {
                path: real.display().to_string(),
            },
        },
    };

    match &retrieved {
        Retrieved::Value(Value::Bytes(bytes)) => out.write_raw(&data, bytes),
        Retrieved::Value(Value::Text(text)) => out.write_raw(&data, text.as_bytes()),
        Retrieved::Value(Value::Json(json)) => {
            let text = serde_json::to_string_pretty(json)?;
            out.write(&data, || format!("{}\n", text))
        }
        Retrieved::Value(Value::Records(records)) => {
            let mut text = String::new();
            for record in records {
                text.push_str(&serde_json::to_string(record)?);
                text.push('\n');
            }
            out.write(&data, || text)
        }
        Retrieved::Value(other) => out.write(&data, || format!("<{} value>\n", other.shape())),
        Retrieved::Path(real) => out.write(&data, || format!("{}\n", real.display())),
    }
}

fn cmd_rm(
    out: &OutputWriter,
    session: &Session,
    project: &str,
    path: &str,
    recursive: bool,
) -> Result<()> {
    let handle = session.load(project)?;
    handle
        .remove(path, recursive)
        .with_context(|| format!("Failed to remove {}:{}", project, path))?;

    let data = RmOutput {
        success: true,
        result_code: 0,
        project: session.info(project),
        path: path.to_string(),
        recursive,
    };
    out.write(&data, || format!("Removed {}\n", data.path))
}

fn cmd_mv(
    out: &OutputWriter,
    session: &Session,
    project: &str,
    from: &str,
    to: &str,
    force: bool,
) -> Result<()> {
    let handle = session.load(project)?;
    handle
        .move_file(from, to, force)
        .with_context(|| format!("Failed to move {} to {}", from, to))?;

    let data = MvOutput {
        success: true,
        result_code: 0,
        project: session.info(project),
        from: from.to_string(),
        to: to.to_string(),
    };
    out.write(&data, || format!("Moved {} -> {}\n", data.from, data.to))
}

fn cmd_export(
    out: &OutputWriter,
    session: &Session,
    project: &str,
    output: Option<PathBuf>,
) -> Result<()> {
    let mut options = ExportOptions::default();
    if let Some(dir) = output {
        options = options.output_dir(dir);
    }

    let archive = session
        .manager
        .export(project, session.collection(), &options)
        .with_context(|| format!("Failed to export project: {}", project))?;
    let entries = archive_entries(&archive)
        .with_context(|| format!("Failed to read archive {}", archive.display()))?;

    let data = ExportOutput {
        success: true,
        result_code: 0,
        project: session.info(project),
        archive: archive.display().to_string(),
        entries,
    };
    out.write(&data, || {
        format!(
            "Exported {} files to {}\n",
            data.entries.len(),
            data.archive
        )
    })
}

fn cmd_import(
    out: &OutputWriter,
    session: &Session,
    archive: &Path,
    name: &str,
    root: Option<&Path>,
) -> Result<()> {
    let handle = session
        .manager
        .import(archive, name, session.collection(), root)
        .with_context(|| format!("Failed to import {} as {}", archive.display(), name))?;

    let data = CreateOutput {
        success: true,
        result_code: 0,
        project: session.info(name),
        root: handle.root()?.display().to_string(),
        files: Some(handle.file_count()?),
    };
    out.write(&data, || {
        format!(
            "Imported {} files into {} at {}\n",
            data.files.unwrap_or_default(),
            handle.id(),
            data.root
        )
    })
}

fn cmd_gc(out: &OutputWriter, session: &Session, project: &str, dry_run: bool) -> Result<()> {
    let handle = session.load(project)?;
    let stats = handle
        .collect_garbage(dry_run)
        .with_context(|| format!("Failed to collect garbage in {}", project))?;

    let data = GcOutput {
        success: true,
        result_code: 0,
        project: session.info(project),
        dry_run,
        stats,
    };
    out.write(&data, || {
        if dry_run {
            format!(
                "Dry run - no objects deleted\nWould delete {} objects\nWould free {} bytes\n",
                data.stats.objects_deleted, data.stats.bytes_freed
            )
        } else {
            format!(
                "Deleted {} objects\nFreed {} bytes\n",
                data.stats.objects_deleted, data.stats.bytes_freed
            )
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use tempfile::TempDir;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_home_flag_wins() {
        let home = resolve_home(Some(PathBuf::from("/tmp/godata-flag")));
        assert_eq!(home, PathBuf::from("/tmp/godata-flag"));
    }

    #[test]
    fn test_parse_store_command() {
        let cli = Cli::try_parse_from([
            "godata", "--home", "/h", "-c", "lab", "store", "survey", "notes/a", "a.txt", "--raw",
        ])
        .unwrap();
        assert_eq!(cli.home, Some(PathBuf::from("/h")));
        assert_eq!(cli.collection.as_deref(), Some("lab"));
        match cli.command {
            Commands::Store {
                project,
                path,
                file,
                raw,
            } => {
                assert_eq!(project, "survey");
                assert_eq!(path, "notes/a");
                assert_eq!(file, PathBuf::from("a.txt"));
                assert!(raw);
            }
            _ => panic!("expected store"),
        }
    }

    #[test]
    fn test_remove_requires_name() {
        assert!(Cli::try_parse_from(["godata", "remove", "--force"]).is_err());
    }

    #[test]
    fn test_session_requires_initialized_home() {
        let temp_dir = TempDir::new().unwrap();
        assert!(Session::open(&temp_dir.path().join("missing"), None).is_err());

        let home = temp_dir.path().join("home");
        LocalBackend::init(&home, Algorithm::Blake3).unwrap();
        let session = Session::open(&home, None).unwrap();
        assert_eq!(session.info("x").collection, DEFAULT_COLLECTION);
    }

    #[test]
    fn test_session_store_and_get_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let home = temp_dir.path().join("home");
        LocalBackend::init(&home, Algorithm::Blake3).unwrap();
        let session = Session::open(&home, None).unwrap();
        session.manager.create("survey", None).unwrap();

        let file = temp_dir.path().join("notes.txt");
        std::fs::write(&file, "clear skies").unwrap();
        let out = OutputWriter::new(true);
        cmd_store(&out, &session, "survey", "notes/night1", &file, false).unwrap();

        let handle = session.load("survey").unwrap();
        assert_eq!(
            handle.get("notes/night1", false).unwrap(),
            Retrieved::Value(Value::from("clear skies"))
        );
    }
}
