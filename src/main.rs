use std::{error::Error, io, process::ExitCode};

use clap::Parser;
use vendorsync::{
    cli::{
        args::{self, CliArgs},
        command_handlers as handlers,
    },
    Vendorsync,
};

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run() {
        Ok(code) => code,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<ExitCode, Box<dyn Error>> {
    let cli_args: CliArgs = CliArgs::parse();
    let mut stdout = io::stdout().lock();

    // These never touch the cache, so they don't take its lock either.
    match &cli_args.cmd {
        args::Command::Key { json } => {
            handlers::do_key(json, &mut stdout)?;
            return Ok(ExitCode::SUCCESS);
        }
        args::Command::Glob { pattern, paths } => {
            handlers::do_glob(pattern, paths, &mut stdout)?;
            return Ok(ExitCode::SUCCESS);
        }
        _ => {}
    }

    let mut builder = Vendorsync::builder();
    if let Some(cache_directory) = &cli_args.cache_directory {
        builder = builder.cache_directory(cache_directory);
    }
    if let Some(jobs) = cli_args.jobs {
        builder = builder.fetch_jobs(jobs);
    }
    let vendorsync = builder.try_build()?;
    let cache = vendorsync.cache();

    match cli_args.cmd {
        args::Command::Has { key } => {
            let found = handlers::do_has(cache, &key)?;
            return Ok(if found {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            });
        }
        args::Command::Put { key, directory } => handlers::do_put(cache, &key, &directory)?,
        args::Command::Get {
            key,
            directory,
            pick,
            exclude,
        } => handlers::do_get(cache, &key, &directory, &pick, &exclude)?,
        args::Command::PutTree { directory } => {
            handlers::do_put_tree(cache, &directory, &mut stdout)?
        }
        args::Command::GetTree { hash, directory } => {
            handlers::do_get_tree(cache, &hash, &directory)?
        }
        args::Command::ClearCache => handlers::do_clear_cache(cache)?,
        args::Command::Key { .. } | args::Command::Glob { .. } => {}
    }
    Ok(ExitCode::SUCCESS)
}
