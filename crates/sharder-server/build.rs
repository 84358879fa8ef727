use vergen_gitcl::{BuildBuilder, CargoBuilder, Emitter, GitclBuilder, RustcBuilder};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let build = BuildBuilder::all_build()?;
    let cargo = CargoBuilder::all_cargo()?;
    let rustc = RustcBuilder::all_rustc()?;

    let mut emitter = Emitter::default();
    emitter
        .add_instructions(&build)?
        .add_instructions(&cargo)?
        .add_instructions(&rustc)?;

    // Container builds often have no .git; take the SHA from the build args instead
    if let Ok(git) = GitclBuilder::all_git() {
        emitter.add_instructions(&git)?;
    } else {
        println!(
            "cargo::rustc-env=VERGEN_GIT_SHA={}",
            std::env::var("VERGEN_GIT_SHA").unwrap_or_else(|_| "unknown".to_string())
        );
    }

    emitter.emit()?;

    Ok(())
}
