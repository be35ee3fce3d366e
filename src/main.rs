// CLI binary entry point for ferrotag

mod cli;

use clap::{Parser, Subcommand};
use std::process;
use tracing_subscriber::EnvFilter;

use cli::{commands, OutputFormat, OutputFormatter};

/// ferrotag - container-aware audio metadata tool
#[derive(Parser, Debug)]
#[command(name = "ferrotag")]
#[command(about = "Read and write audio metadata tags", long_about = None)]
#[command(version)]
struct Config {
    /// Output format
    #[arg(short, long, value_enum, default_value = "pretty")]
    format: OutputFormat,

    /// Quiet mode (suppress status messages)
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Read metadata from audio file(s)
    Read {
        /// Audio file path(s)
        files: Vec<String>,

        /// Output to a file instead of stdout
        #[arg(short, long)]
        output: Option<String>,

        /// Include the first cover (base64) in the output
        #[arg(long)]
        with_cover: bool,
    },

    /// Write metadata to an audio file
    Write {
        /// Audio file path
        file: String,

        /// Metadata JSON object
        #[arg(short, long)]
        metadata: Option<String>,

        /// Read the metadata JSON from a file
        #[arg(long)]
        from_file: Option<String>,
    },

    /// Detect container format and tag kinds
    Detect {
        /// Audio file path(s)
        files: Vec<String>,
    },

    /// Show stream parameters and parse diagnostics
    Info {
        /// Audio file path(s)
        files: Vec<String>,

        /// Output to a file instead of stdout
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Export embedded cover art
    ExportCover {
        /// Audio file path
        file: String,

        /// Directory to write the image(s) into
        #[arg(short, long, default_value = ".")]
        output: String,

        /// Cover index (all covers when omitted)
        #[arg(short, long)]
        index: Option<usize>,
    },

    /// Set cover art from an image file
    SetCover {
        /// Audio file path
        file: String,

        /// Image file path
        #[arg(short, long)]
        image: String,

        /// MIME type (derived from the extension when omitted)
        #[arg(short, long)]
        mime_type: Option<String>,

        /// Cover description
        #[arg(short, long)]
        description: Option<String>,
    },

    /// Remove one metadata field
    Remove {
        /// Audio file path
        file: String,

        /// Field name (title, artist, album, ...)
        field: String,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = Config::parse();
    let formatter = OutputFormatter::new(config.format, config.quiet);

    let result = match &config.command {
        Commands::Read {
            files,
            output,
            with_cover,
        } => commands::command_read(files, output.as_deref(), *with_cover, &formatter),
        Commands::Write {
            file,
            metadata,
            from_file,
        } => commands::command_write(file, metadata.as_deref(), from_file.as_deref(), &formatter),
        Commands::Detect { files } => commands::command_detect(files, &formatter),
        Commands::Info { files, output } => {
            commands::command_info(files, &formatter, output.as_deref())
        }
        Commands::ExportCover {
            file,
            output,
            index,
        } => commands::command_export_cover(file, output, *index, &formatter),
        Commands::SetCover {
            file,
            image,
            mime_type,
            description,
        } => commands::command_set_cover(
            file,
            image,
            mime_type.as_deref(),
            description.as_deref(),
            &formatter,
        ),
        Commands::Remove { file, field } => commands::command_remove(file, field, &formatter),
    };

    if let Err(e) = result {
        formatter.print_error(&e.to_string());
        process::exit(1);
    }
}
