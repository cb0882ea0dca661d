use anyhow::Result;

mod app;
mod logging;

fn main() -> Result<()> {
    let args = pe_watch::cli::parse();
    app::run(args)
}
