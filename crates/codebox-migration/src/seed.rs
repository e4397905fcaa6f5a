//! Seed datasets
//!
//! A seed is a JSON object mapping workspace names to nested trees, where a
//! string value is a file and an object value is a directory:
//!
//! ```json
//! { "default_workspace": { "README.txt": "hello", "contracts": {} } }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use codebox_storage::Workspace;

use crate::error::MigrationError;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SeedNode {
    File(String),
    Directory(BTreeMap<String, SeedNode>),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeedData {
    pub workspaces: BTreeMap<String, BTreeMap<String, SeedNode>>,
}

impl SeedData {
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| MigrationError::InvalidSeed(e.to_string()))
    }

    /// Build workspaces, validating every name and path.
    pub fn to_workspaces(&self) -> Result<Vec<Workspace>> {
        let mut out = Vec::with_capacity(self.workspaces.len());
        for (name, tree) in &self.workspaces {
            let mut ws = Workspace::new(name.clone());
            for (entry, node) in tree {
                add_node(&mut ws, entry, node);
            }
            ws.validate()
                .map_err(|e| MigrationError::InvalidSeed(e.to_string()))?;
            out.push(ws);
        }
        Ok(out)
    }

    /// Diagnostic dataset used to exercise migration end to end.
    pub fn migration_fixture() -> Self {
        let mut workspaces = BTreeMap::new();

        workspaces.insert(
            "default_workspace".to_string(),
            tree([
                (
                    "README.txt",
                    file("This workspace was created to test storage migration.\n"),
                ),
                (
                    "contracts",
                    dir([
                        (
                            "1_Storage.sol",
                            file("// SPDX-License-Identifier: GPL-3.0\npragma solidity >=0.7.0 <0.9.0;\n\ncontract Storage {\n    uint256 number;\n\n    function store(uint256 num) public {\n        number = num;\n    }\n}\n"),
                        ),
                        ("empty_folder", dir([])),
                    ]),
                ),
                (
                    "scripts",
                    dir([(
                        "deploy.js",
                        file("console.log('deploying Storage')\n"),
                    )]),
                ),
            ]),
        );

        workspaces.insert("emptyspace".to_string(), BTreeMap::new());

        workspaces.insert(
            "workspace_test".to_string(),
            tree([
                ("contract.sol", file("contract test {}\n")),
                (
                    "tests",
                    dir([("test.sol", file("contract testContract {}\n"))]),
                ),
            ]),
        );

        Self { workspaces }
    }
}

fn add_node(ws: &mut Workspace, path: &str, node: &SeedNode) {
    match node {
        SeedNode::File(content) => ws.insert_file(path, content.as_bytes()),
        SeedNode::Directory(children) => {
            ws.insert_directory(path);
            for (child, node) in children {
                add_node(ws, &format!("{}/{}", path, child), node);
            }
        }
    }
}

fn file(content: &str) -> SeedNode {
    SeedNode::File(content.to_string())
}

fn dir<const N: usize>(children: [(&str, SeedNode); N]) -> SeedNode {
    SeedNode::Directory(tree(children))
}

fn tree<const N: usize>(children: [(&str, SeedNode); N]) -> BTreeMap<String, SeedNode> {
    children
        .into_iter()
        .map(|(name, node)| (name.to_string(), node))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_shape() {
        let workspaces = SeedData::migration_fixture().to_workspaces().unwrap();
        let names: Vec<&str> = workspaces.iter().map(|ws| ws.name.as_str()).collect();
        assert_eq!(names, vec!["default_workspace", "emptyspace", "workspace_test"]);

        let default = &workspaces[0];
        assert!(default.file("contracts/1_Storage.sol").is_some());
        assert!(default.directories.contains("contracts/empty_folder"));
        assert!(workspaces[1].is_empty());
        assert_eq!(
            workspaces[2].file("contract.sol"),
            Some(&b"contract test {}\n"[..])
        );
    }

    #[test]
    fn test_from_json() {
        let seed = SeedData::from_json(
            r#"{ "ws": { "a.txt": "a", "src": { "lib.sol": "contract L {}" }, "docs": {} } }"#,
        )
        .unwrap();
        let ws = seed.to_workspaces().unwrap().remove(0);

        assert_eq!(ws.file("src/lib.sol"), Some(&b"contract L {}"[..]));
        assert!(ws.directories.contains("docs"));
        assert!(ws.directories.contains("src"));
    }

    #[test]
    fn test_invalid_seed() {
        assert!(matches!(
            SeedData::from_json(r#"{ "ws": { "a.txt": 3 } }"#),
            Err(MigrationError::InvalidSeed(_))
        ));

        let seed = SeedData::from_json(r#"{ "ws": { "..": "escape" } }"#).unwrap();
        assert!(matches!(
            seed.to_workspaces(),
            Err(MigrationError::InvalidSeed(_))
        ));
    }
}
