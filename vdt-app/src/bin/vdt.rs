pub fn main() {
    vdt_app::cli::launch();
}
