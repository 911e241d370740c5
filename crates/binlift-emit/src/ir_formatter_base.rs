use binlift_core::{
    Arch, DataContents, Function, FunctionKind, GlobalVariable, Instruction, Module, RelocTarget,
    Signature, StorageClass, Terminator, Value,
};

/// Formats the pieces of a module; [`crate::IrEmitter`] decides layout and color.
pub struct IrFormatterBase<'m> {
    module: &'m Module,
}

impl<'m> IrFormatterBase<'m> {
    pub fn new(module: &'m Module) -> Self {
        Self { module }
    }

    fn arch(&self) -> Arch {
        self.module.arch()
    }

    pub fn format_value(value: &Value) -> String {
        match value {
            Value::Temp(t) => format!("%{}", t),
            Value::Param(p) => format!("%{}", p),
        }
    }

    pub fn function_ref(&self, id: binlift_core::FuncId) -> String {
        format!("@{}", self.module.function(id).name)
    }

    pub fn global_ref(&self, id: binlift_core::GlobalId) -> String {
        format!("@{}", self.module.global(id).name)
    }

    pub fn format_signature(signature: &Signature) -> String {
        let params = signature
            .params
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        if signature.returns.is_empty() {
            format!("({})", params)
        } else {
            let returns = signature
                .returns
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            format!("({}) -> {}", params, returns)
        }
    }

    pub fn format_kind(&self, kind: &FunctionKind) -> String {
        match kind {
            FunctionKind::Lifted => "lifted".to_string(),
            FunctionKind::NativeEntry { target } => format!("entry({})", self.function_ref(*target)),
            FunctionKind::Import => "import".to_string(),
            FunctionKind::Intrinsic => "intrinsic".to_string(),
            FunctionKind::InitFini => "init_fini".to_string(),
        }
    }

    /// `linkage [visibility] [storage]`, omitting defaults.
    pub fn format_attributes(
        linkage: binlift_core::Linkage,
        visibility: binlift_core::Visibility,
        storage: StorageClass,
    ) -> String {
        let mut parts = vec![linkage.to_string()];
        if visibility != binlift_core::Visibility::Default {
            parts.push(visibility.to_string());
        }
        if storage != StorageClass::Default {
            parts.push(storage.to_string());
        }
        parts.join(" ")
    }

    pub fn function_header(&self, function: &Function) -> String {
        format!(
            "function @{}{} {} {}",
            function.name,
            Self::format_signature(&function.signature),
            Self::format_attributes(function.linkage, function.visibility, function.storage_class),
            self.format_kind(&function.kind)
        )
    }

    pub fn global_header(global: &GlobalVariable) -> String {
        let keyword = if global.is_declaration() {
            "extern"
        } else if global.is_constant {
            "const"
        } else {
            "global"
        };
        format!(
            "{} @{}: {} {} align {}",
            keyword,
            global.name,
            global.ty,
            Self::format_attributes(global.linkage, global.visibility, global.storage_class),
            global.alignment
        )
    }

    pub fn format_contents(contents: &DataContents) -> String {
        match contents {
            DataContents::Zeros(size) => format!("zeroinit {}", size),
            DataContents::Bytes(bytes) => {
                let hex = bytes.iter().map(|b| format!("{:02x}", b)).collect::<String>();
                format!("bytes x\"{}\"", hex)
            }
        }
    }

    pub fn format_reloc_target(&self, target: &RelocTarget, addend: i64) -> String {
        let base = match target {
            RelocTarget::Function(id) => self.function_ref(*id),
            RelocTarget::Global(id) => self.global_ref(*id),
        };
        match addend {
            0 => base,
            a if a > 0 => format!("{} + {}", base, a),
            a => format!("{} - {}", base, a.unsigned_abs()),
        }
    }

    pub fn format_instruction(&self, inst: &Instruction) -> String {
        let v = Self::format_value;
        let reg = |r| self.arch().register_name(r);
        match inst {
            Instruction::Const { result, value } => format!("%{} = const {}", result, value),
            Instruction::ReadRegister { result, reg: r } => {
                format!("%{} = read_reg {}", result, reg(*r))
            }
            Instruction::WriteRegister { reg: r, value } => {
                format!("write_reg {}, {}", reg(*r), v(value))
            }
            Instruction::StateAddress { result, offset } => {
                format!("%{} = state_addr {}", result, offset)
            }
            Instruction::Binary {
                result,
                op,
                lhs,
                rhs,
            } => format!("%{} = {} {}, {}", result, op, v(lhs), v(rhs)),
            Instruction::Compare {
                result,
                op,
                lhs,
                rhs,
            } => format!("%{} = icmp {} {}, {}", result, op, v(lhs), v(rhs)),
            Instruction::Load { result, addr, size } => {
                format!("%{} = load.{} {}", result, size.ty(), v(addr))
            }
            Instruction::Store { addr, value, size } => {
                format!("store.{} {}, {}", size.ty(), v(value), v(addr))
            }
            Instruction::GlobalAddress {
                result,
                global,
                offset,
            } => {
                if *offset == 0 {
                    format!("%{} = global_addr {}", result, self.global_ref(*global))
                } else {
                    format!(
                        "%{} = global_addr {}, {}",
                        result,
                        self.global_ref(*global),
                        offset
                    )
                }
            }
            Instruction::FunctionAddress { result, func } => {
                format!("%{} = func_addr {}", result, self.function_ref(*func))
            }
            Instruction::AllocStack { result, size } => {
                format!("%{} = alloc_stack {:#x}", result, size)
            }
            Instruction::CallLifted { callee } => {
                format!("call_lifted {}", self.function_ref(*callee))
            }
            Instruction::CallNative {
                result,
                callee,
                args,
            } => {
                let args = args.iter().map(v).collect::<Vec<_>>().join(", ");
                match result {
                    Some(result) => format!(
                        "%{} = call {}({})",
                        result,
                        self.function_ref(*callee),
                        args
                    ),
                    None => format!("call {}({})", self.function_ref(*callee), args),
                }
            }
            Instruction::Dispatch { handler, target } => {
                format!("dispatch {}, {}", self.function_ref(*handler), v(target))
            }
        }
    }

    pub fn format_terminator(terminator: &Terminator) -> String {
        match terminator {
            Terminator::Jump(target) => format!("jump {}", target),
            Terminator::Branch {
                condition,
                then_block,
                else_block,
            } => format!(
                "brif {}, {}, {}",
                Self::format_value(condition),
                then_block,
                else_block
            ),
            Terminator::Return(Some(value)) => format!("return {}", Self::format_value(value)),
            Terminator::Return(None) => "return".to_string(),
            Terminator::Unreachable => "unreachable".to_string(),
            Terminator::Invalid => "<unterminated>".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use binlift_core::{
        BinaryOp, Linkage, OperatingSystem, TempId, Type, Visibility,
    };

    #[test]
    fn test_instruction_formatting_uses_register_names() {
        let module = Module::new("m", Arch::X86_64, OperatingSystem::Linux);
        let formatter = IrFormatterBase::new(&module);
        let rdi = Arch::X86_64.register("rdi").unwrap();

        assert_eq!(
            formatter.format_instruction(&Instruction::ReadRegister {
                result: TempId(0),
                reg: rdi
            }),
            "%t0 = read_reg RDI"
        );
        assert_eq!(
            formatter.format_instruction(&Instruction::Binary {
                result: TempId(2),
                op: BinaryOp::Xor,
                lhs: Value::Temp(TempId(0)),
                rhs: Value::Param(binlift_core::ParamId(1)),
            }),
            "%t2 = xor %t0, %arg1"
        );
    }

    #[test]
    fn test_attributes_omit_defaults() {
        assert_eq!(
            IrFormatterBase::format_attributes(
                Linkage::Internal,
                Visibility::Default,
                StorageClass::Default
            ),
            "internal"
        );
        assert_eq!(
            IrFormatterBase::format_attributes(
                Linkage::External,
                Visibility::Default,
                StorageClass::DllExport
            ),
            "external dllexport"
        );
    }

    #[test]
    fn test_signature_formatting() {
        assert_eq!(IrFormatterBase::format_signature(&Signature::lifted()), "(ptr)");
        assert_eq!(
            IrFormatterBase::format_signature(&Signature::new(vec![Type::I64], vec![Type::I64])),
            "(i64) -> i64"
        );
    }
}
