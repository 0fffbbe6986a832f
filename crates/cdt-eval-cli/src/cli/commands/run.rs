use super::super::args::{GlobalArgs, RunAllArgs, RunArgs};
use super::context::{build_manager, RunContext};
use crate::exit_codes::{EXIT_CASES_FAILED, EXIT_SUCCESS};
use cdt_eval_core::report::console::print_run_report;
use cdt_eval_core::RunReport;
use tracing::info;

fn announce(ctx: &RunContext) {
    info!(
        url = %ctx.cfg.url,
        model = %ctx.cfg.params.model,
        pool_size = ctx.cfg.pool_size,
        "classification service"
    );
}

fn finish(report: &RunReport) -> i32 {
    print_run_report(report);
    if report.all_passing() {
        EXIT_SUCCESS
    } else {
        EXIT_CASES_FAILED
    }
}

pub async fn run_all(g: &GlobalArgs, args: RunAllArgs) -> anyhow::Result<i32> {
    let mut ctx = build_manager(g)?;
    announce(&ctx);
    let report = ctx.manager.run_all(args.force).await?;
    Ok(finish(&report))
}

pub async fn run_needs_work(g: &GlobalArgs) -> anyhow::Result<i32> {
    let mut ctx = build_manager(g)?;
    if ctx.manager.needs_work().is_empty() {
        println!("Nothing needs work: every case is passing.");
        return Ok(EXIT_SUCCESS);
    }
    announce(&ctx);
    let report = ctx.manager.run_needs_work().await?;
    Ok(finish(&report))
}

pub async fn run_category(g: &GlobalArgs, args: RunArgs) -> anyhow::Result<i32> {
    let mut ctx = build_manager(g)?;
    announce(&ctx);
    let report = ctx.manager.run_category(&args.category).await?;
    Ok(finish(&report))
}
