use ctor::ctor;

#[ctor]
fn init() {
    // Keep whisper.cpp quiet; its output would tear the terminal UI
    std::env::set_var("WHISPER_PRINT_DEBUG", "0");
    std::env::set_var("WHISPER_PRINT_PROGRESS", "0");

    // RUST_LOG overrides the default; logs go to stderr
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("error"))
        .try_init();
}
