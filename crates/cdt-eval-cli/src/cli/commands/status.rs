use super::super::args::GlobalArgs;
use super::context::{load_catalog, load_eval_config, open_store};
use crate::exit_codes::EXIT_SUCCESS;
use cdt_eval_core::report::console::{print_id_list, print_status};
use cdt_eval_core::{ResultStore, TestCatalog};

fn open(g: &GlobalArgs) -> anyhow::Result<(TestCatalog, ResultStore)> {
    let cfg = load_eval_config(g)?;
    let catalog = load_catalog(&cfg)?;
    let store = open_store(g, &cfg, &catalog)?;
    Ok((catalog, store))
}

pub fn status(g: &GlobalArgs) -> anyhow::Result<i32> {
    let (catalog, store) = open(g)?;
    print_status(&store, &catalog);
    Ok(EXIT_SUCCESS)
}

pub fn passed(g: &GlobalArgs) -> anyhow::Result<i32> {
    let (_, store) = open(g)?;
    print_id_list("Passing both", &store.passing());
    Ok(EXIT_SUCCESS)
}

pub fn needs_work(g: &GlobalArgs) -> anyhow::Result<i32> {
    let (_, store) = open(g)?;
    print_id_list("Needs work", &store.needs_work());
    Ok(EXIT_SUCCESS)
}

pub fn reset(g: &GlobalArgs) -> anyhow::Result<i32> {
    let (_, mut store) = open(g)?;
    store.reset()?;
    println!("Cleared all results in {}", store.location());
    Ok(EXIT_SUCCESS)
}
