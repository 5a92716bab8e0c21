//! batman-adv interface attachment
//!
//! The kernel module does the actual mesh routing; all the node does is add
//! its wireless interface to the mesh and bring the virtual interface up.
//! Requires `batctl` and `ip` on the path and enough privilege to use them.

use gridmesh_core::TransportError;
use tokio::process::Command;
use tracing::{info, instrument};

/// A wireless interface joined to a batman-adv mesh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatmanInterface {
    phy: String,
    mesh: String,
}

impl BatmanInterface {
    /// Describe an attachment of `phy` to the mesh interface `mesh`
    pub fn new(phy: impl Into<String>, mesh: impl Into<String>) -> Self {
        Self {
            phy: phy.into(),
            mesh: mesh.into(),
        }
    }

    /// The physical interface
    pub fn phy(&self) -> &str {
        &self.phy
    }

    /// The mesh interface
    pub fn mesh(&self) -> &str {
        &self.mesh
    }

    /// The commands [`attach`](Self::attach) runs, in order
    pub fn commands(&self) -> Vec<Vec<String>> {
        vec![
            vec![
                "batctl".into(),
                "meshif".into(),
                self.mesh.clone(),
                "if".into(),
                "add".into(),
                self.phy.clone(),
            ],
            vec![
                "ip".into(),
                "link".into(),
                "set".into(),
                "up".into(),
                "dev".into(),
                self.mesh.clone(),
            ],
        ]
    }

    /// Add the wireless interface to the mesh and bring the mesh up
    #[instrument(skip(self), fields(phy = %self.phy, mesh = %self.mesh))]
    pub async fn attach(&self) -> Result<(), TransportError> {
        for argv in self.commands() {
            run(&argv).await?;
        }
        info!("Mesh interface attached");
        Ok(())
    }
}

async fn run(argv: &[String]) -> Result<(), TransportError> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| TransportError::Unavailable("empty command".into()))?;

    let output = Command::new(program).args(args).output().await?;
    if output.status.success() {
        Ok(())
    } else {
        Err(TransportError::Unavailable(format!(
            "`{}` failed ({}): {}",
            argv.join(" "),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }
}
