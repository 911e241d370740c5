use crate::block::{BasicBlock, BlockId};
use crate::linkage::{Linkage, StorageClass, Visibility};
use crate::types::Type;
use crate::values::TempId;
use cranelift_entity::entity_impl;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FuncId(u32);
entity_impl!(FuncId, "func");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub signature: Signature,
    pub kind: FunctionKind,
    pub linkage: Linkage,
    pub visibility: Visibility,
    pub storage_class: StorageClass,
    /// Native address this function was recovered from.
    pub native_address: Option<u64>,
    /// `None` while the function is only declared.
    pub body: Option<FunctionBody>,
}

impl Function {
    pub fn new(name: impl Into<String>, signature: Signature, kind: FunctionKind) -> Self {
        Self {
            name: name.into(),
            signature,
            kind,
            linkage: Linkage::Internal,
            visibility: Visibility::Default,
            storage_class: StorageClass::Default,
            native_address: None,
            body: None,
        }
    }

    pub fn with_linkage(mut self, linkage: Linkage) -> Self {
        self.linkage = linkage;
        self
    }

    pub fn with_native_address(mut self, address: u64) -> Self {
        self.native_address = Some(address);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_declaration(&self) -> bool {
        self.body.is_none()
    }

    pub fn is_externally_visible(&self) -> bool {
        self.linkage.is_external() && self.visibility == Visibility::Default
    }

    /// Functions that set up their own register state instead of receiving one.
    pub fn owns_state(&self) -> bool {
        matches!(
            self.kind,
            FunctionKind::NativeEntry { .. } | FunctionKind::InitFini
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionKind {
    /// Lifted machine code: takes the state pointer, returns nothing.
    Lifted,
    /// Native-callable forwarder into a lifted function.
    NativeEntry { target: FuncId },
    /// Imported native function.
    Import,
    /// Runtime support routine provided by the embedding environment.
    Intrinsic,
    /// Synthesized constructor or destructor driver.
    InitFini,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub params: Vec<Type>,
    pub returns: Vec<Type>,
}

impl Signature {
    pub fn new(params: Vec<Type>, returns: Vec<Type>) -> Self {
        Self { params, returns }
    }

    /// `(state: ptr) -> ()`, shared by every lifted function.
    pub fn lifted() -> Self {
        Self::new(vec![Type::Ptr], Vec::new())
    }

    /// Integer-register native signature with `num_args` arguments and one result.
    pub fn native(num_args: usize) -> Self {
        Self::new(vec![Type::I64; num_args], vec![Type::I64])
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionBody {
    pub entry_block: BlockId,
    pub blocks: IndexMap<BlockId, BasicBlock>,
    next_block_id: u32,
    next_temp_id: u32,
}

impl FunctionBody {
    pub fn new() -> Self {
        let entry_block = BlockId(0);
        let mut blocks = IndexMap::new();
        blocks.insert(entry_block, BasicBlock::new(entry_block));

        Self {
            entry_block,
            blocks,
            next_block_id: 1,
            next_temp_id: 0,
        }
    }

    pub fn create_block(&mut self) -> BlockId {
        let id = BlockId(self.next_block_id);
        self.next_block_id += 1;
        self.blocks.insert(id, BasicBlock::new(id));
        id
    }

    pub fn new_temp(&mut self) -> TempId {
        let id = TempId(self.next_temp_id);
        self.next_temp_id += 1;
        id
    }

    pub fn get_block(&self, id: BlockId) -> Option<&BasicBlock> {
        self.blocks.get(&id)
    }

    pub fn get_block_mut(&mut self, id: BlockId) -> Option<&mut BasicBlock> {
        self.blocks.get_mut(&id)
    }

    pub fn entry_block(&self) -> BlockId {
        self.entry_block
    }

    pub fn instruction_count(&self) -> usize {
        self.blocks.values().map(|b| b.instructions.len()).sum()
    }
}

impl Default for FunctionBody {
    fn default() -> Self {
        Self::new()
    }
}
