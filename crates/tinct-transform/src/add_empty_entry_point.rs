//! Adds a trivial compute entry point to modules that have none.

use tinct_ir::{EntryPoint, Function, Module};

use crate::{DataMap, Transform, TransformError};

/// Some targets reject modules without an entry point. This pass adds
/// `@compute @workgroup_size(1) fn unused_entry_point() {}` when needed.
#[derive(Debug)]
pub struct AddEmptyEntryPoint;

impl Transform for AddEmptyEntryPoint {
    fn name(&self) -> &'static str {
        "AddEmptyEntryPoint"
    }

    fn should_run(&self, module: &Module, _inputs: &DataMap) -> bool {
        module.entry_points().next().is_none()
    }

    fn apply(
        &self,
        module: &Module,
        _inputs: &DataMap,
        _outputs: &mut DataMap,
    ) -> Result<Module, TransformError> {
        let mut out = module.clone();
        let mut f = Function::new(out.fresh_name("unused_entry_point"));
        f.entry_point = Some(EntryPoint::compute(1, 1, 1));
        out.functions.append(f);
        Ok(out)
    }
}
