/// Decide then evolve: run `handle` and fold every resulting event with `apply`.
///
/// The aggregate is only touched when `handle` succeeds, so a rejected command
/// leaves it exactly as it was.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: bulkyard_core::Aggregate,
{
    let events = A::handle(aggregate, command)?;
    for ev in &events {
        A::apply(aggregate, ev);
    }
    Ok(events)
}
