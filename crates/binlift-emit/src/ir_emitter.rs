use anyhow::Result;
use binlift_core::{Function, FunctionBody, GlobalVariable, Module};
use colored::Color;
use std::io::Write;

use crate::config::EmitterConfig;
use crate::emitter::{EmitContext, EmitHelper, EmitResult, Emitter};
use crate::ir_formatter_base::IrFormatterBase;

/// Writes a module as text: header, globals, functions, then constructor and destructor lists.
pub struct IrEmitter {
    config: EmitterConfig,
}

impl IrEmitter {
    pub fn new(config: EmitterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EmitterConfig {
        &self.config
    }

    /// Emits `module` with the configured indentation and colors.
    pub fn emit_module(&self, module: &Module) -> Result<String> {
        let mut buffer = Vec::new();
        let mut context = EmitContext::from_config(&self.config);
        self.emit(module, &mut buffer, &mut context)?;
        Ok(String::from_utf8(buffer)?)
    }

    fn emit_header<W: Write>(&self, module: &Module, writer: &mut W, ctx: &EmitContext) -> EmitResult {
        EmitHelper::write_comment(
            writer,
            ctx,
            &format!(
                "module {} ({}-{}, {:?} dialect)",
                module.name,
                module.arch(),
                module.os(),
                module.metadata.dialect
            ),
        )?;
        if let Some(digest) = &module.metadata.source_digest {
            EmitHelper::write_comment(writer, ctx, &format!("source sha256 {}", digest))?;
        }
        if let Some(channel) = &module.metadata.annotation_channel {
            EmitHelper::write_comment(writer, ctx, &format!("annotations under !{}", channel))?;
        }
        Ok(())
    }

    fn emit_global<W: Write>(
        &self,
        formatter: &IrFormatterBase,
        global: &GlobalVariable,
        writer: &mut W,
        ctx: &mut EmitContext,
    ) -> EmitResult {
        let mut header = IrFormatterBase::global_header(global);
        if self.config.verbosity.should_print_addresses() {
            if let Some(address) = global.native_address {
                header.push_str(&format!(" @ {:#x}", address));
            }
        }

        let Some(init) = global.initializer.as_ref().filter(|_| self.config.include_data) else {
            return EmitHelper::write_colored_line(writer, ctx, &header, Color::Cyan);
        };

        EmitHelper::write_colored_line(
            writer,
            ctx,
            &format!("{} = {}", header, IrFormatterBase::format_contents(&init.contents)),
            Color::Cyan,
        )?;
        ctx.indent();
        for reloc in &init.relocations {
            EmitHelper::write_line(
                writer,
                ctx,
                &format!(
                    "reloc +{}: {}",
                    reloc.offset,
                    formatter.format_reloc_target(&reloc.target, reloc.addend)
                ),
            )?;
        }
        ctx.dedent();
        Ok(())
    }

    fn emit_function<W: Write>(
        &self,
        formatter: &IrFormatterBase,
        function: &Function,
        writer: &mut W,
        ctx: &mut EmitContext,
    ) -> EmitResult {
        let mut header = formatter.function_header(function);
        if self.config.verbosity.should_print_addresses() {
            if let Some(address) = function.native_address {
                header.push_str(&format!(" @ {:#x}", address));
            }
        }

        match function.body.as_ref() {
            Some(body) if self.config.verbosity.should_print_bodies() => {
                let header = ctx.paint(&header, Color::Blue);
                EmitHelper::write_block(writer, ctx, &header, |w, c| {
                    self.emit_body(formatter, body, w, c)
                })
            }
            _ => {
                let keyword = if function.is_declaration() { "declare" } else { "define" };
                EmitHelper::write_colored_line(
                    writer,
                    ctx,
                    &format!("{} {}", keyword, header.trim_start_matches("function ")),
                    Color::Blue,
                )
            }
        }
    }

    fn emit_body<W: Write>(
        &self,
        formatter: &IrFormatterBase,
        body: &FunctionBody,
        writer: &mut W,
        ctx: &mut EmitContext,
    ) -> EmitResult {
        for block in body.blocks.values() {
            ctx.dedent();
            let label = match block.address {
                Some(address) if self.config.verbosity.should_print_addresses() => {
                    format!("{}:  ; {:#x}", block.id, address)
                }
                _ => format!("{}:", block.id),
            };
            EmitHelper::write_colored_line(writer, ctx, &label, Color::Yellow)?;
            ctx.indent();

            for data in &block.instructions {
                let mut line = formatter.format_instruction(&data.inst);
                if self.config.include_native_pcs {
                    match (data.pc, data.annotation) {
                        (Some(pc), Some(note)) if pc != note => {
                            line.push_str(&format!("  ; pc {:#x} !{:#x}", pc, note))
                        }
                        (Some(pc), _) => line.push_str(&format!("  ; pc {:#x}", pc)),
                        (None, Some(note)) => line.push_str(&format!("  ; !{:#x}", note)),
                        (None, None) => {}
                    }
                }
                EmitHelper::write_line(writer, ctx, &line)?;
            }
            EmitHelper::write_colored_line(
                writer,
                ctx,
                &IrFormatterBase::format_terminator(&block.terminator),
                Color::Magenta,
            )?;
        }
        Ok(())
    }
}

impl Default for IrEmitter {
    fn default() -> Self {
        Self::new(EmitterConfig::default())
    }
}

impl Emitter for IrEmitter {
    type Item = Module;

    fn emit<W: Write>(&self, module: &Module, writer: &mut W, context: &mut EmitContext) -> EmitResult {
        let formatter = IrFormatterBase::new(module);
        self.emit_header(module, writer, context)?;

        if module.global_count() > 0 {
            writeln!(writer)?;
            for (_, global) in module.globals() {
                self.emit_global(&formatter, global, writer, context)?;
            }
        }

        for (_, function) in module.functions() {
            writeln!(writer)?;
            self.emit_function(&formatter, function, writer, context)?;
        }

        for (label, list) in [("constructors", &module.constructors), ("destructors", &module.destructors)] {
            if list.is_empty() {
                continue;
            }
            let names = list
                .iter()
                .map(|&id| formatter.function_ref(id))
                .collect::<Vec<_>>()
                .join(", ");
            writeln!(writer)?;
            EmitHelper::write_line(writer, context, &format!("{} = [{}]", label, names))?;
        }
        Ok(())
    }
}

/// Writes a module as pretty-printed JSON, the same format `ir_persist` saves.
pub fn emit_json<W: Write>(module: &Module, writer: &mut W) -> Result<()> {
    serde_json::to_writer_pretty(&mut *writer, module)?;
    writeln!(writer)?;
    Ok(())
}
