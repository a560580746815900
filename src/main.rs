fn main() -> anyhow::Result<()> {
    focusdeck_lib::run()
}
