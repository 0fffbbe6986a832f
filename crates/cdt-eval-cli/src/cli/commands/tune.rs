use super::super::args::{GlobalArgs, TuneArgs};
use super::context::{build_dispatcher, load_catalog, load_eval_config, open_store};
use crate::exit_codes::EXIT_SUCCESS;
use cdt_eval_core::report::console::print_tune_report;
use cdt_eval_core::tuner::{tune, DEFAULT_CANDIDATES};
use std::num::NonZeroUsize;

pub async fn run(g: &GlobalArgs, args: TuneArgs) -> anyhow::Result<i32> {
    let cfg = load_eval_config(g)?;
    let catalog = load_catalog(&cfg)?;
    let mut store = open_store(g, &cfg, &catalog)?;
    let dispatcher = build_dispatcher(&cfg)?;

    let sizes = if args.sizes.is_empty() {
        DEFAULT_CANDIDATES.to_vec()
    } else {
        args.sizes
    };
    let take = args.sample.unwrap_or(catalog.len()).min(catalog.len());
    let sample = &catalog.cases[..take];

    eprintln!(
        "Tuning pool size over {:?} with {} case(s) per trial (cache disabled)...",
        sizes, take
    );
    let report = tune(&dispatcher, &sizes, sample).await?;
    print_tune_report(&report);

    if let Some(recommended) = NonZeroUsize::new(report.recommended) {
        store.set_tuned_pool_size(recommended)?;
        println!(
            "Saved pool size {} as the default for later runs ({}).",
            recommended,
            store.location()
        );
    }
    Ok(EXIT_SUCCESS)
}
