use crate::scope::RegionTree;
use crate::validate::Region;

/// The RegionVisitor trait is the single traversal mechanism for region trees.
///
/// Rules:
/// 1. Children are visited in source order, parents before children.
/// 2. Implementers override `visit_*` methods to add behavior.
/// 3. Implementers MUST call `walk_region` to continue traversal unless pruning is intended.
pub trait RegionVisitor {
    fn visit_tree(&mut self, tree: &RegionTree) {
        self.visit_region(tree, tree.root());
    }

    fn visit_region(&mut self, tree: &RegionTree, region: &Region) {
        if region.is_host() {
            self.visit_host(tree, region);
        }
        walk_region(self, tree, region);
    }

    fn visit_host(&mut self, _tree: &RegionTree, _region: &Region) {
        // Hook only; traversal continues from visit_region
    }
}

pub fn walk_region<V: RegionVisitor + ?Sized>(visitor: &mut V, tree: &RegionTree, region: &Region) {
    for &child in &region.children {
        visitor.visit_region(tree, tree.get(child));
    }
}

/// Collects every hosting region, module first.
#[derive(Default)]
pub struct HostCollector {
    pub hosts: Vec<usize>,
}

impl RegionVisitor for HostCollector {
    fn visit_host(&mut self, _tree: &RegionTree, region: &Region) {
        self.hosts.push(region.id);
    }
}
