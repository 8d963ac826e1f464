use std::{env, fs, process::Command};

use crate::{dist_dir, project_root, DynError};

pub fn dist() -> Result<(), DynError> {
    let _ = fs::remove_dir_all(dist_dir());
    fs::create_dir_all(dist_dir())?;

    dist_library()?;

    Ok(())
}

pub fn dist_library() -> Result<(), DynError> {
    // Get the `cargo` command and then package the library
    let cargo = env::var("CARGO").unwrap_or_else(|_| "cargo".to_string());
    let status = Command::new(cargo)
        .current_dir(project_root())
        .args(["package", "--package", "ferrodb_client", "--allow-dirty"])
        .status()?;

    if !status.success() {
        return Err("cargo package failed".into());
    }

    // Copy the .crate archive into the dist directory
    let package_dir = project_root().join("target/package");
    for entry in fs::read_dir(package_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with("ferrodb_client-") && name.ends_with(".crate") {
            fs::copy(entry.path(), dist_dir().join(name.as_ref()))?;
        }
    }

    Ok(())
}
