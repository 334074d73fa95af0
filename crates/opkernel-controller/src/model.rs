//! Address navigation over the live model tree.
//!
//! The node for `/type=name` lives at `root[type][name]`.

use opkernel_core::{ModelNode, PathAddress};

/// Copy of the node at `address`; undefined when nothing is there.
pub fn read_at(root: &ModelNode, address: &PathAddress) -> ModelNode {
    let mut node = root;
    for element in address.elements() {
        match node.get(element.key()).and_then(|children| children.get(element.value())) {
            Some(child) => node = child,
            None => return ModelNode::Undefined,
        }
    }
    node.clone()
}

/// Swap `candidate` in at `address`.
///
/// An undefined candidate removes the resource; a child-type container left
/// empty by the removal goes with it.
pub fn commit_at(root: &mut ModelNode, address: &PathAddress, candidate: ModelNode) {
    let Some((last, parents)) = address.elements().split_last() else {
        *root = if candidate.is_defined() { candidate } else { ModelNode::new_object() };
        return;
    };

    if candidate.is_defined() {
        let mut node = root;
        for element in parents {
            node = node.entry(element.key()).entry(element.value());
        }
        node.entry(last.key()).set(last.value(), candidate);
        return;
    }

    let mut node = root;
    for element in parents {
        match node
            .get_mut(element.key())
            .and_then(|children| children.get_mut(element.value()))
        {
            Some(child) => node = child,
            None => return,
        }
    }
    let now_empty = match node.get_mut(last.key()) {
        Some(children) => {
            children.remove(last.value());
            children.as_object().map(|m| m.is_empty()).unwrap_or(false)
        }
        None => false,
    };
    if now_empty {
        node.remove(last.key());
    }
}

/// Names of the `child_type` children present under `node`.
pub fn child_names(node: &ModelNode, child_type: &str) -> Vec<String> {
    node.get(child_type)
        .map(|children| children.keys().into_iter().map(String::from).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_then_remove_restores_root() {
        let mut root = ModelNode::new_object();
        let addr: PathAddress = "/subsystem=deployment-scanner/scanner=default".parse().unwrap();
        commit_at(&mut root, &addr, ModelNode::new_object().with("path", "deployments"));
        assert_eq!(read_at(&root, &addr).get("path"), Some(&ModelNode::from("deployments")));

        commit_at(&mut root, &addr, ModelNode::Undefined);
        assert_eq!(
            root,
            ModelNode::new_object().with("subsystem", ModelNode::new_object().with("deployment-scanner", ModelNode::new_object()))
        );
    }

    #[test]
    fn read_missing_is_undefined() {
        let root = ModelNode::new_object();
        let addr: PathAddress = "/jvm=default".parse().unwrap();
        assert!(!read_at(&root, &addr).is_defined());
    }
}
