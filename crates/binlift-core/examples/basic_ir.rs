use binlift_core::{
    arch::{Arch, OperatingSystem},
    builder::FunctionBuilder,
    codegen::ObjectEmitter,
    function::{Function, FunctionBody, FunctionKind, Signature},
    instructions::BinaryOp,
    linkage::Linkage,
    module::Module,
};

fn main() {
    println!("Building a lifted add function...\n");

    let arch = Arch::X86_64;
    let os = OperatingSystem::Linux;
    let mut module = Module::new("basic", arch, os);

    let args = arch.argument_registers(os);
    let rax = arch.return_register();

    let mut lifted = Function::new("sub_1000", Signature::lifted(), FunctionKind::Lifted)
        .with_native_address(0x1000);
    let mut body = FunctionBody::new();
    {
        let mut b = FunctionBuilder::new(&mut body);
        b.set_pc(Some(0x1000));
        let lhs = b.read_register(args[0]);
        let rhs = b.read_register(args[1]);
        let sum = b.binary(BinaryOp::Add, lhs, rhs);
        b.write_register(rax, sum);
        b.ret(None);
    }
    lifted.body = Some(body);
    let lifted = module.declare_function(lifted).unwrap();

    let mut entry = Function::new(
        "add",
        Signature::native(2),
        FunctionKind::NativeEntry { target: lifted },
    )
    .with_linkage(Linkage::External);
    let mut body = FunctionBody::new();
    {
        let mut b = FunctionBuilder::new(&mut body);
        let sp = b.alloc_stack(0x10000);
        b.write_register(arch.stack_pointer(), sp);
        for (i, reg) in args.iter().take(2).enumerate() {
            let p = b.param(i as u32);
            b.write_register(*reg, p);
        }
        b.call_lifted(lifted);
        let result = b.read_register(rax);
        b.ret(Some(result));
    }
    entry.body = Some(body);
    module.declare_function(entry).unwrap();

    module.verify().unwrap();
    println!("Functions: {}", module.function_count());
    for (_, function) in module.functions() {
        let instructions = function
            .body
            .as_ref()
            .map(|b| b.instruction_count())
            .unwrap_or(0);
        println!("  - {} ({}, {} instructions)", function.name, function.linkage, instructions);
    }

    let object = ObjectEmitter::emit(&module).unwrap();
    println!("\nObject size: {} bytes", object.len());
}
