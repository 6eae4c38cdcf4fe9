// Copyright (c) 2022 Huawei Technologies Co.,Ltd. All rights reserved.
//
// sysMaster is licensed under Mulan PSL v2.
// You can use this software according to the terms and conditions of the Mulan
// PSL v2.
// You may obtain a copy of Mulan PSL v2 at:
//         http://license.coscl.org.cn/MulanPSL2
// THIS SOFTWARE IS PROVIDED ON AN "AS IS" BASIS, WITHOUT WARRANTIES OF ANY
// KIND, EITHER EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO
// NON-INFRINGEMENT, MERCHANTABILITY OR FIT FOR A PARTICULAR PURPOSE.
// See the Mulan PSL v2 for more details.

//! Helpers shared by the unit tests of the workspace crates.
use std::{
    env,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};

/// The workspace root: the closest ancestor of the current dir holding a `[workspace]` manifest.
pub fn get_project_root() -> io::Result<PathBuf> {
    let path = env::current_dir()?;
    let mut current_path = Some(path.as_path());

    while let Some(p) = current_path {
        if is_workspace_root(p) {
            return Ok(p.into());
        }
        current_path = p.parent();
    }

    Err(io::Error::new(ErrorKind::NotFound, "NotFound"))
}

fn is_workspace_root(dir: &Path) -> bool {
    match std::fs::read_to_string(dir.join("Cargo.toml")) {
        Ok(content) => content.lines().any(|l| l.trim() == "[workspace]"),
        Err(_) => false,
    }
}

/// get the crate root path
pub fn get_crate_root() -> io::Result<PathBuf> {
    let manifest_dir = env!("CARGO_MANIFEST_DIR");
    Ok(PathBuf::from(manifest_dir))
}

/// A scratch directory under `target/tests`, created on demand.
pub fn get_target_test_dir() -> io::Result<PathBuf> {
    let root = get_project_root().or_else(|_| env::current_dir())?;
    let test_dir = root.join("target").join("tests");

    if !test_dir.exists() {
        std::fs::create_dir_all(&test_dir)?;
    }

    Ok(test_dir)
}

/// A fresh, empty scratch directory named `name` under `target/tests`.
pub fn get_clean_test_dir(name: &str) -> io::Result<PathBuf> {
    let dir = get_target_test_dir()?.join(name);
    if dir.exists() {
        std::fs::remove_dir_all(&dir)?;
    }
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use crate::{get_clean_test_dir, get_crate_root, get_project_root, get_target_test_dir};

    #[test]
    fn test_get_project_root() {
        let root = get_project_root().unwrap();
        assert!(root.join("Cargo.toml").is_file());
        assert!(root.join("libs").is_dir());
    }

    #[test]
    fn test_get_crate_root() {
        let file_path = get_crate_root().unwrap().join("Cargo.toml");
        assert!(file_path.is_file());
    }

    #[test]
    fn test_get_target_test_dir() {
        let test_dir = get_target_test_dir().unwrap();
        assert!(test_dir.exists());
    }

    #[test]
    fn test_get_clean_test_dir() {
        let dir = get_clean_test_dir("libtests-clean").unwrap();
        std::fs::write(dir.join("f"), "x").unwrap();
        let dir = get_clean_test_dir("libtests-clean").unwrap();
        assert!(!dir.join("f").exists());
    }
}
