/*! Instruction-level construction of function bodies.
 *
 * Every stage that writes code (body definition, entry-point and init/fini synthesis, the legacy
 * downgrade) goes through [`FunctionBuilder`], so temps are numbered consistently and every
 * instruction picks up the native PC it was lifted from.
 */

mod function_builder;

pub use function_builder::FunctionBuilder;
