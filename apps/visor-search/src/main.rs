use clap::Parser;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;
	let args = visor_search::Args::parse();
	visor_search::run(args).await
}
