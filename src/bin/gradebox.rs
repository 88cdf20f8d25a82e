fn main() -> anyhow::Result<()> {
    gradebox::cli::run()
}
