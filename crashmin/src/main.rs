fn main() -> anyhow::Result<()> {
    crashmin::main()
}
