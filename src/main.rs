use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
  pp_lib::run().await
}
