use std::io::Read;

use anyhow::{bail, Context, Result};

/// Apply the patch given as the first argument, or read from stdin when no
/// argument is present.
fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let patch = match (args.next(), args.next()) {
        (Some(patch), None) => patch,
        (None, _) => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("failed to read patch from stdin")?;
            buffer
        }
        (Some(_), Some(_)) => bail!("usage: apply_patch '<patch>'"),
    };

    let workdir = std::env::current_dir().context("failed to resolve working directory")?;
    let result = apply_patch_engine::exec_any_patch(&patch, Some(&workdir));
    print!("{}", result.stdout);
    if !result.is_success() {
        eprintln!("{}", result.stderr);
        std::process::exit(result.exit_code);
    }
    Ok(())
}
