use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "zipstream")]
#[command(version)]
#[command(about = "Streaming, memory-bounded ZIP extraction", long_about = None)]
#[command(after_help = "Examples:\n  \
  zipstream data.zip -d out                extract data.zip into out/\n  \
  zipstream data.zip -i '*.txt' -x 'tmp*'  extract only matching entries\n  \
  zipstream -l https://example.com/a.zip   list entries of a remote ZIP\n  \
  zipstream data.zip --score               print a run-quality report")]
pub struct Cli {
    /// ZIP file path or HTTP URL
    #[arg(value_name = "FILE")]
    pub file: String,

    /// List entries (short format)
    #[arg(short = 'l')]
    pub list: bool,

    /// List verbosely with sizes and timestamps
    #[arg(short = 'v')]
    pub verbose: bool,

    /// Extract entries into DIR (default: current directory)
    #[arg(short = 'd', value_name = "DIR")]
    pub dest: Option<String>,

    /// Only extract entries matching these glob patterns
    #[arg(short = 'i', long = "include", value_name = "PATTERN")]
    pub include: Vec<String>,

    /// Skip entries matching these glob patterns
    #[arg(short = 'x', long = "exclude", value_name = "PATTERN")]
    pub exclude: Vec<String>,

    /// Overwrite existing files
    #[arg(short = 'o', long)]
    pub overwrite: bool,

    /// Also extract (and count) directory entries
    #[arg(long)]
    pub dirs: bool,

    /// Memory limit in megabytes for buffered data
    #[arg(short = 'm', long = "memory-limit", value_name = "MB", default_value_t = 64)]
    pub memory_limit_mb: u64,

    /// Skip entries larger than this many megabytes
    #[arg(long = "max-entry-size", value_name = "MB")]
    pub max_entry_size_mb: Option<u64>,

    /// Force the chunked streaming path for every entry
    #[arg(long)]
    pub streaming: bool,

    /// Print a verification score after the run
    #[arg(long)]
    pub score: bool,

    /// Quiet mode (-qq => quieter)
    #[arg(short = 'q', action = clap::ArgAction::Count)]
    pub quiet: u8,
}

impl Cli {
    pub fn is_http_url(&self) -> bool {
        self.file.starts_with("http://") || self.file.starts_with("https://")
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet > 0
    }

    pub fn is_very_quiet(&self) -> bool {
        self.quiet > 1
    }
}
