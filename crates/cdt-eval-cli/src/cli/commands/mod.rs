use super::args::*;

pub mod catalog;
pub(crate) mod context;
pub mod run;
pub mod status;
pub mod tune;

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    let g = cli.global;
    match cli.cmd {
        Command::RunAll(args) => run::run_all(&g, args).await,
        Command::RunNeedsWork => run::run_needs_work(&g).await,
        Command::Run(args) => run::run_category(&g, args).await,
        Command::Status => status::status(&g),
        Command::Passed => status::passed(&g),
        Command::NeedsWork => status::needs_work(&g),
        Command::Reset => status::reset(&g),
        Command::Tune(args) => tune::run(&g, args).await,
        Command::Categories => catalog::categories(&g),
        Command::CheckCatalog(args) => catalog::check(&g, args),
    }
}
