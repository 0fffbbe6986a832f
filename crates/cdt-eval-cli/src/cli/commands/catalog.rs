use super::super::args::{CheckCatalogArgs, GlobalArgs};
use super::context::{load_catalog, load_eval_config};
use crate::exit_codes::{EXIT_CASES_FAILED, EXIT_SUCCESS};
use anyhow::Context;
use cdt_eval_core::catalog::load_code_table;

pub fn categories(g: &GlobalArgs) -> anyhow::Result<i32> {
    let cfg = load_eval_config(g)?;
    let catalog = load_catalog(&cfg)?;
    println!("{} case(s)", catalog.len());
    for (name, count) in catalog.categories() {
        println!("  {:<24} {}", name, count);
    }
    Ok(EXIT_SUCCESS)
}

pub fn check(g: &GlobalArgs, args: CheckCatalogArgs) -> anyhow::Result<i32> {
    let cfg = load_eval_config(g)?;
    let catalog = load_catalog(&cfg)?;
    let known = load_code_table(&args.codes)
        .with_context(|| format!("failed to load code table {}", args.codes.display()))?;

    let missing = catalog.missing_codes(&known);
    if missing.is_empty() {
        println!(
            "All expected codes in {} case(s) are present in {} ({} codes).",
            catalog.len(),
            args.codes.display(),
            known.len()
        );
        return Ok(EXIT_SUCCESS);
    }

    println!("{} expected code(s) missing from the code table:", missing.len());
    for (code, ids) in &missing {
        println!("  {}  used by {}", code, ids.join(", "));
    }
    Ok(EXIT_CASES_FAILED)
}
