use cranelift_codegen::ir::{self as clif_ir, AbiParam, InstBuilder, StackSlotData, StackSlotKind};
use cranelift_codegen::isa;
use cranelift_codegen::settings::{self, Configurable};
use cranelift_codegen::Context;
use cranelift_frontend::FunctionBuilderContext;
use cranelift_module::{DataDescription, Linkage as ClifLinkage, Module as ClifModule};
use cranelift_object::{ObjectBuilder, ObjectModule};
use std::collections::HashMap;
use tracing::debug;

use crate::{
    arch::{Arch, OperatingSystem},
    codegen::context::{CodegenContext, SymbolMap},
    codegen::lowering::{lower_instruction, lower_terminator, LoweringEnv},
    function::{FuncId, Function, FunctionBody, Signature},
    global::{DataContents, GlobalVariable, RelocTarget},
    linkage::{Linkage, Visibility},
    module::Module,
    values::{ParamId, Value},
    IrError, Result,
};

/// Compiles a lifted module into a relocatable object for its target.
pub struct ObjectEmitter {
    object: ObjectModule,
    arch: Arch,
    os: OperatingSystem,
}

impl ObjectEmitter {
    pub fn new(module_name: &str, arch: Arch, os: OperatingSystem) -> Result<Self> {
        let mut flags_builder = settings::builder();
        flags_builder
            .set("is_pic", "true")
            .map_err(|e| IrError::CraneliftError(format!("Failed to set flags: {}", e)))?;

        let isa_builder = isa::lookup_by_name(arch.triple(os))
            .map_err(|e| IrError::CraneliftError(format!("Failed to lookup ISA: {}", e)))?;

        let flags = settings::Flags::new(flags_builder);
        let isa = isa_builder
            .finish(flags)
            .map_err(|e| IrError::CraneliftError(format!("Failed to create ISA: {}", e)))?;

        let object_builder = ObjectBuilder::new(
            isa,
            module_name,
            cranelift_module::default_libcall_names(),
        )
        .map_err(|e| IrError::CraneliftError(format!("Failed to create object: {}", e)))?;

        Ok(Self {
            object: ObjectModule::new(object_builder),
            arch,
            os,
        })
    }

    /// Verifies `module` and compiles it for the target recorded in its metadata.
    pub fn emit(module: &Module) -> Result<Vec<u8>> {
        Self::new(&module.name, module.arch(), module.os())?.compile_module(module)
    }

    pub fn compile_module(mut self, module: &Module) -> Result<Vec<u8>> {
        module.verify()?;

        let mut symbols = SymbolMap::default();

        for (id, function) in module.functions() {
            let sig = self.make_signature(&function.signature);
            let linkage = object_linkage(
                function.linkage,
                function.visibility,
                function.is_declaration(),
            );
            let func_id = self
                .object
                .declare_function(&function.name, linkage, &sig)
                .map_err(|e| {
                    IrError::CraneliftError(format!(
                        "Failed to declare function {}: {}",
                        function.name, e
                    ))
                })?;
            symbols.functions.insert(id, func_id);
        }

        for (id, global) in module.globals() {
            let data_id = self
                .object
                .declare_data(
                    &global.name,
                    object_linkage(global.linkage, global.visibility, global.is_declaration()),
                    !global.is_constant,
                    false,
                )
                .map_err(|e| {
                    IrError::CraneliftError(format!("Failed to declare data {}: {}", global.name, e))
                })?;
            symbols.data.insert(id, data_id);
        }

        for (id, global) in module.globals() {
            if !global.is_declaration() {
                self.define_global(id, global, &symbols)?;
            }
        }

        for (id, function) in module.functions() {
            if let Some(body) = &function.body {
                self.define_function(id, function, body, &symbols)?;
            }
        }

        let (init_section, fini_section) = self.init_fini_sections();
        self.define_function_array("__binlift_ctors", init_section, &module.constructors, &symbols)?;
        self.define_function_array("__binlift_dtors", fini_section, &module.destructors, &symbols)?;

        let product = self.object.finish();
        let obj_bytes = product
            .emit()
            .map_err(|e| IrError::CraneliftError(format!("Failed to emit object: {}", e)))?;

        debug!("Emitted {} bytes of object code for {}", obj_bytes.len(), module.name);
        Ok(obj_bytes)
    }

    fn make_signature(&self, signature: &Signature) -> clif_ir::Signature {
        let pointer_type = self.object.target_config().pointer_type();
        let mut sig = self.object.make_signature();
        for param in &signature.params {
            if let Some(ty) = param.to_cranelift(pointer_type) {
                sig.params.push(AbiParam::new(ty));
            }
        }
        for ret in &signature.returns {
            if let Some(ty) = ret.to_cranelift(pointer_type) {
                sig.returns.push(AbiParam::new(ty));
            }
        }
        sig
    }

    fn define_global(
        &mut self,
        id: crate::global::GlobalId,
        global: &GlobalVariable,
        symbols: &SymbolMap,
    ) -> Result<()> {
        let Some(init) = &global.initializer else {
            return Ok(());
        };

        let mut desc = DataDescription::new();
        match &init.contents {
            DataContents::Bytes(bytes) => desc.define(bytes.clone().into_boxed_slice()),
            DataContents::Zeros(size) if init.relocations.is_empty() => {
                desc.define_zeroinit(*size as usize)
            }
            DataContents::Zeros(size) => desc.define(vec![0u8; *size as usize].into_boxed_slice()),
        }
        desc.set_align(global.alignment.max(1));

        for reloc in &init.relocations {
            match reloc.target {
                RelocTarget::Function(func) => {
                    let func_ref = self
                        .object
                        .declare_func_in_data(symbols.function(func)?, &mut desc);
                    desc.write_function_addr(reloc.offset as u32, func_ref);
                }
                RelocTarget::Global(target) => {
                    let gv = self
                        .object
                        .declare_data_in_data(symbols.data(target)?, &mut desc);
                    desc.write_data_addr(reloc.offset as u32, gv, reloc.addend);
                }
            }
        }

        self.object
            .define_data(symbols.data(id)?, &desc)
            .map_err(|e| IrError::CraneliftError(format!("Failed to define data {}: {}", global.name, e)))
    }

    fn define_function(
        &mut self,
        id: FuncId,
        function: &Function,
        body: &FunctionBody,
        symbols: &SymbolMap,
    ) -> Result<()> {
        let func_id = symbols.function(id)?;
        let pointer_type = self.object.target_config().pointer_type();

        let mut clif_func = clif_ir::Function::new();
        clif_func.signature = self
            .object
            .declarations()
            .get_function_decl(func_id)
            .signature
            .clone();

        let mut builder_context = FunctionBuilderContext::new();
        let mut builder = cranelift_frontend::FunctionBuilder::new(&mut clif_func, &mut builder_context);

        let mut blocks = HashMap::new();
        for block_id in body.blocks.keys() {
            blocks.insert(*block_id, builder.create_block());
        }
        let entry = *blocks
            .get(&body.entry_block)
            .ok_or_else(|| IrError::CraneliftError(format!("{} has no entry block", function.name)))?;

        builder.append_block_params_for_function_params(entry);
        builder.switch_to_block(entry);

        let params = builder.block_params(entry).to_vec();
        let state = if function.owns_state() {
            let slot = builder.create_sized_stack_slot(StackSlotData::new(
                StackSlotKind::ExplicitSlot,
                self.arch.state_size() as u32,
                4,
            ));
            builder.ins().stack_addr(pointer_type, slot, 0)
        } else {
            *params.first().ok_or_else(|| {
                IrError::CraneliftError(format!("{} takes no state pointer", function.name))
            })?
        };

        let mut ctx = CodegenContext {
            pointer_type,
            state,
            values: HashMap::new(),
            blocks,
            returns_value: !function.signature.returns.is_empty(),
        };
        for (i, param) in params.iter().enumerate() {
            ctx.values.insert(Value::Param(ParamId(i as u32)), *param);
        }

        let mut env = LoweringEnv {
            object: &mut self.object,
            symbols,
            arch: self.arch,
        };

        // The entry block is already current; the rest follow in layout order.
        let order = std::iter::once(body.entry_block)
            .chain(body.blocks.keys().copied().filter(|&b| b != body.entry_block));
        for block_id in order {
            let block = &body.blocks[&block_id];
            let clif_block = ctx.block(block_id)?;
            if clif_block != entry {
                builder.switch_to_block(clif_block);
            }
            for data in &block.instructions {
                lower_instruction(&data.inst, &mut ctx, &mut builder, &mut env)?;
            }
            lower_terminator(&block.terminator, &ctx, &mut builder)?;
        }

        builder.seal_all_blocks();
        builder.finalize();

        let mut context = Context::for_function(clif_func);
        self.object
            .define_function(func_id, &mut context)
            .map_err(|e| {
                IrError::CraneliftError(format!("Failed to define function {}: {}", function.name, e))
            })?;
        Ok(())
    }

    fn init_fini_sections(&self) -> ((&'static str, &'static str), (&'static str, &'static str)) {
        match self.os {
            OperatingSystem::MacOs => (
                ("__DATA", "__mod_init_func"),
                ("__DATA", "__mod_term_func"),
            ),
            OperatingSystem::Windows => ((".CRT", ".CRT$XCU"), (".CRT", ".CRT$XTU")),
            OperatingSystem::Linux => (("", ".init_array"), ("", ".fini_array")),
        }
    }

    /// Emits an array of function pointers into a loader-recognized section.
    fn define_function_array(
        &mut self,
        name: &str,
        (segment, section): (&str, &str),
        functions: &[FuncId],
        symbols: &SymbolMap,
    ) -> Result<()> {
        if functions.is_empty() {
            return Ok(());
        }

        let pointer_size = self.arch.pointer_size();
        let data_id = self
            .object
            .declare_data(name, ClifLinkage::Local, true, false)
            .map_err(|e| IrError::CraneliftError(format!("Failed to declare {}: {}", name, e)))?;

        let mut desc = DataDescription::new();
        desc.define(vec![0u8; (pointer_size as usize) * functions.len()].into_boxed_slice());
        desc.set_align(pointer_size);
        desc.set_segment_section(segment, section);
        for (i, &func) in functions.iter().enumerate() {
            let func_ref = self
                .object
                .declare_func_in_data(symbols.function(func)?, &mut desc);
            desc.write_function_addr((i as u64 * pointer_size) as u32, func_ref);
        }

        self.object
            .define_data(data_id, &desc)
            .map_err(|e| IrError::CraneliftError(format!("Failed to define {}: {}", name, e)))
    }
}

/// Maps IR linkage onto object-file linkage. Declarations are always imports.
pub fn object_linkage(linkage: Linkage, visibility: Visibility, is_declaration: bool) -> ClifLinkage {
    if is_declaration {
        return ClifLinkage::Import;
    }
    match (linkage, visibility) {
        (Linkage::Internal, _) => ClifLinkage::Local,
        (_, Visibility::Hidden) => ClifLinkage::Hidden,
        (_, Visibility::Default) => ClifLinkage::Export,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_linkage_mapping() {
        assert_eq!(
            object_linkage(Linkage::Internal, Visibility::Default, false),
            ClifLinkage::Local
        );
        assert_eq!(
            object_linkage(Linkage::External, Visibility::Default, false),
            ClifLinkage::Export
        );
        assert_eq!(
            object_linkage(Linkage::External, Visibility::Hidden, false),
            ClifLinkage::Hidden
        );
        assert_eq!(
            object_linkage(Linkage::ExternalWeak, Visibility::Default, true),
            ClifLinkage::Import
        );
    }
}
