/*! Test coverage for the IR module and its invariants.
 *
 * Lifting stages lean on the module to keep its symbol table, address index and entry-point map
 * consistent. These tests pin that behavior down independently of any stage.
 */
