use clap::Parser;

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "seqmap-pipelines", version, about = "Short-read mapping pipeline with library contamination gate")]
pub struct Arguments {

    #[arg(short = 'c', long = "config", help = "JSON run configuration (samples, genome index, contaminant genomes)")]
    pub config: String,

    #[arg(short = 'v', long = "verbose", action)]
    pub verbose: bool,

    #[arg(short = 't', long, help = "Threads per tool invocation; overrides the run file")]
    pub threads: Option<usize>,

    #[arg(long = "three-step", default_value_t = false, help = "Enable trim-and-retry mapping of unmapped reads")]
    pub three_step: bool,

    #[arg(short = 'p', long, help = "Prefix for run-level statistics; overrides the run file")]
    pub prefix: Option<String>,

    #[arg(long = "script-dir", help = "Directory holding the autosome AWK filters")]
    pub script_dir: Option<String>,

    #[arg(long = "dry-run", default_value_t = false, help = "Print the rendered commands without running them")]
    pub dry_run: bool,

    #[arg(long, help = "Write the built workflow as JSON to this path")]
    pub plan: Option<String>,

    #[arg(long = "skip-contamination", default_value_t = false)]
    pub skip_contamination: bool,

    #[arg(long = "skip-tool-check", default_value_t = false, help = "Do not probe external tools before running")]
    pub skip_tool_check: bool,
}
