use std::fmt;

/// One hop in a device path.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum PathNode {
    Pci { device: u8, function: u8 },
    Usb { port: u8, interface: u8 },
}

/// Hardware identity of a device: the chain of hops from the platform root
/// down to it. Used to tag status records and published controllers so boot
/// logs name a physical position, not a transient pointer.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Default)]
pub struct DevicePath {
    nodes: Vec<PathNode>,
}

impl DevicePath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn pci(device: u8, function: u8) -> Self {
        Self {
            nodes: vec![PathNode::Pci { device, function }],
        }
    }

    pub fn push(&mut self, node: PathNode) {
        self.nodes.push(node);
    }

    pub fn child_usb(&self, port: u8, interface: u8) -> DevicePath {
        let mut child = self.clone();
        child.push(PathNode::Usb { port, interface });
        child
    }

    pub fn nodes(&self) -> &[PathNode] {
        &self.nodes
    }
}

impl fmt::Display for DevicePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nodes.is_empty() {
            return f.write_str("/");
        }
        for (i, node) in self.nodes.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            match node {
                PathNode::Pci { device, function } => write!(f, "Pci({device},{function})")?,
                PathNode::Usb { port, interface } => write!(f, "Usb({port},{interface})")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_paths_extend_without_mutating_parent() {
        let parent = DevicePath::pci(0, 3);
        let child = parent.child_usb(1, 0);
        let grandchild = child.child_usb(0, 2);
        assert_eq!(parent.nodes().len(), 1);
        assert_eq!(child.nodes().len(), 2);
        assert_eq!(grandchild.to_string(), "Pci(0,3)/Usb(1,0)/Usb(0,2)");
    }

    #[test]
    fn empty_path_renders_as_root() {
        assert_eq!(DevicePath::root().to_string(), "/");
    }
}
