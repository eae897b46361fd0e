use std::io::{self, IsTerminal};
use std::process::ExitCode;

use clap::Parser;

use btsession::{Args, OutputFormat, RunSettings, radio_driver, run};

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(error) = try_main(Args::parse()).await {
        eprintln!("error: {error:#}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

async fn try_main(args: Args) -> anyhow::Result<()> {
    let mut stdout = io::stdout();
    let output = args.output_format().unwrap_or_else(|| {
        if stdout.is_terminal() {
            OutputFormat::Pretty
        } else {
            OutputFormat::Json
        }
    });
    let settings = RunSettings::builder()
        .output(output)
        .maybe_log_level(args.log_level())
        .config(args.session_config()?)
        .build();

    let (command, fake) = args.into_command_and_fake_args();
    let driver = radio_driver(fake).await?;
    run(command, &mut stdout, driver, settings).await
}
