use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "autotune-replay",
    version,
    about = "Replay a candidate detection configuration over history and keep it if it scores better"
)]
pub struct Args {
    /// Job parameters as JSON; `-` reads stdin.
    #[arg(long, required_unless_present = "print_params_template")]
    pub params: Option<PathBuf>,
    #[arg(long, default_value_t = false)]
    pub print_params_template: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_flag_is_required() {
        assert!(Args::try_parse_from(["autotune-replay"]).is_err());
    }

    #[test]
    fn template_flag_stands_alone() {
        let args = Args::try_parse_from(["autotune-replay", "--print-params-template"]).unwrap();
        assert!(args.print_params_template);
        assert!(args.params.is_none());
    }

    #[test]
    fn params_path_is_parsed() {
        let args = Args::try_parse_from(["autotune-replay", "--params", "/tmp/job.json"]).unwrap();
        assert_eq!(args.params, Some(PathBuf::from("/tmp/job.json")));
    }
}
