//! gj-shell - login shell for the shared git account.
//!
//! Invoked by sshd as `gj-shell -c '<git command>'` with `GJUSER` set by
//! the matching `authorized_keys` entry.

use std::env;
use std::ffi::OsString;
use std::process;

use git_junction::gateway::EXIT_EXEC_FAILED;
use git_junction::identity::IDENTITY_ENV;
use git_junction::metadata::CgitrcStore;
use git_junction::{init_tracing, CommandGateway, Config};

fn main() {
    init_tracing(None);

    let config = match Config::load(None) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "cannot load configuration");
            eprintln!("service unavailable");
            process::exit(EXIT_EXEC_FAILED);
        }
    };

    let args: Vec<OsString> = env::args_os().skip(1).collect();
    let gateway = CommandGateway::new(&config, CgitrcStore);
    process::exit(gateway.run(env::var_os(IDENTITY_ENV).as_deref(), &args));
}
