fn main() -> anyhow::Result<()> {
    adhan_alarm_lib::run()
}
