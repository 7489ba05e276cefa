use camsync_app::cli::CliArgs;

fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse_args();
    camsync_app::init_logging();
    camsync_app::run(args)
}
