//
// main.rs
//
// Process entry point: argument handling and logger setup
//

use std::env;

fn print_usage() {
    println!("garnet {}, a Ruby language server.", env!("CARGO_PKG_VERSION"));
    print!(
        r#"
Usage: garnet [OPTIONS]

Available options:

--stdio                      Start the language server on stdin/stdout
--version                    Print the version
--help                       Print this help message

"#
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut argv = env::args();
    argv.next(); // skip executable name

    let mut use_stdio = false;

    for arg in argv {
        match arg.as_str() {
            "--stdio" => use_stdio = true,
            "--version" => {
                println!("garnet {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" => {
                print_usage();
                return Ok(());
            }
            other => {
                return Err(anyhow::anyhow!("Unknown argument: '{other}'"));
            }
        }
    }

    if !use_stdio {
        print_usage();
        return Ok(());
    }

    env_logger::init();

    garnet::server::start_lsp().await
}
