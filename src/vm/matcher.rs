use crate::common::value::{Tag, Value};
use crate::vm::{heap::Heap, trace::Trace};

/// The branch a subject selected, plus the values its pattern
/// captured, slot by slot.
#[derive(Debug, PartialEq, Eq)]
pub struct Selection {
    pub branch: usize,
    pub captures: Vec<(u32, Value)>,
}

/// Walks the match-data cell at `pattern` against `subject`,
/// branch by branch, returning the first that matches.
/// No match is a trap; the source has nowhere to fall through to.
pub fn dispatch(
    consts: &[u32],
    heap: &Heap,
    subject: Value,
    pattern: u32,
) -> Result<Selection, Trace> {
    let header = Value(consts[pattern as usize]);
    if !header.is(Tag::MatchHeader) {
        return Err(Trace::error(
            "MatchError",
            "match data is corrupt (missing branch header)",
        ));
    }

    let branches = header.payload() as usize;
    for branch in 0..branches {
        let root = Value(consts[pattern as usize + 1 + branch]);
        let mut captures = vec![];

        if matches(consts, heap, root, subject, &mut captures) {
            return Ok(Selection { branch, captures });
        }
    }

    Err(Trace::error("MatchError", "no branch matched the value"))
}

/// One pattern node against one value. Atomic patterns match by
/// bitwise equality; capture variables match anything; compound
/// patterns compare the symbol header and recurse on the payload.
fn matches(
    consts: &[u32],
    heap: &Heap,
    pattern: Value,
    subject: Value,
    captures: &mut Vec<(u32, Value)>,
) -> bool {
    match pattern.tag() {
        Tag::MatchVar => {
            captures.push((pattern.payload(), subject));
            return true;
        }

        Tag::Compound => {
            // the subject has to be compound too, in either memory
            let (header, base, heaped) = match subject.tag() {
                Tag::Compound => (
                    Value(consts[subject.payload() as usize]),
                    subject.payload(),
                    false,
                ),
                Tag::HeapCompound => (Value(heap.get(subject.payload())), subject.payload(), true),
                _ => return false,
            };

            let pattern_base = pattern.payload() as usize;
            if Value(consts[pattern_base]) != header {
                return false;
            }

            let (_, arity) = header.as_compound_header();
            for i in 0..arity {
                let child = Value(consts[pattern_base + 1 + i as usize]);
                let slot = if heaped {
                    Value(heap.get(base + 1 + i))
                } else {
                    Value(consts[(base + 1 + i) as usize])
                };
                if !matches(consts, heap, child, slot, captures) {
                    return false;
                }
            }
            return true;
        }

        _ => pattern == subject,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::common::constant::{ConstTable, Constant};

    fn table(branches: &[Constant]) -> (Vec<u32>, u32) {
        let mut table = ConstTable::new();
        let addr = table.match_cell(branches);
        (table.into_words(), addr)
    }

    #[test]
    fn numbers_match_bitwise() {
        let (consts, addr) = table(&[Constant::Number(11), Constant::Number(22)]);
        let heap = Heap::new();

        let selected = dispatch(&consts, &heap, Value::number(22), addr).unwrap();
        assert_eq!(selected.branch, 1);
        assert!(selected.captures.is_empty());
    }

    #[test]
    fn symbols_do_not_match_equal_numbers() {
        let (consts, addr) = table(&[Constant::Symbol(22)]);
        let heap = Heap::new();

        assert!(dispatch(&consts, &heap, Value::number(22), addr).is_err());
        assert!(dispatch(&consts, &heap, Value::symbol(22), addr).is_ok());
    }

    #[test]
    fn compound_subjects_recurse() {
        let mut table = ConstTable::new();
        let addr = table.match_cell(&[
            Constant::Compound(1, vec![Constant::Number(55), Constant::Number(66)]),
            Constant::Compound(1, vec![Constant::Number(55), Constant::Number(77)]),
        ]);
        let subject = table.encode(&Constant::Compound(
            1,
            vec![Constant::Number(55), Constant::Number(77)],
        ));

        let consts = table.into_words();
        let heap = Heap::new();

        let selected = dispatch(&consts, &heap, subject, addr).unwrap();
        assert_eq!(selected.branch, 1);
    }

    #[test]
    fn capture_variables_bind_sub_values() {
        let (consts, addr) = table(&[
            Constant::Compound(1, vec![Constant::Number(55), Constant::Number(66)]),
            Constant::Compound(1, vec![Constant::Number(55), Constant::MatchVar(0)]),
        ]);

        // a heap copy of `sym(55, 77)`
        let mut heap = Heap::new();
        let base = heap.alloc(&[
            Value::compound_header(1, 2).0,
            Value::number(55).0,
            Value::number(77).0,
        ]);

        let selected =
            dispatch(&consts, &heap, Value::heap_compound(base), addr).unwrap();
        assert_eq!(selected.branch, 1);
        assert_eq!(selected.captures, vec![(0, Value::number(77))]);
    }

    #[test]
    fn capture_slots_count_positionally() {
        let mut table = ConstTable::new();
        let addr = table.match_cell(&[Constant::Compound(
            2,
            vec![
                Constant::MatchVar(0),
                Constant::Number(5),
                Constant::MatchVar(1),
            ],
        )]);
        let subject = table.encode(&Constant::Compound(
            2,
            vec![
                Constant::Number(1),
                Constant::Number(5),
                Constant::Number(9),
            ],
        ));

        let consts = table.into_words();
        let heap = Heap::new();

        let selected = dispatch(&consts, &heap, subject, addr).unwrap();
        assert_eq!(
            selected.captures,
            vec![(0, Value::number(1)), (1, Value::number(9))],
        );
    }
}
