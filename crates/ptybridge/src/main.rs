//! CLI entrypoint for ptybridge.

use anyhow::Result;
use ptybridge::Application;

fn main() -> Result<()> {
    let app = Application::new();
    let exit_code = app.run()?;
    std::process::exit(exit_code);
}
