use crate::compiler::{
    nst::{Atom, Lambda, MatchBranch, Nst, VarKind},
    syntax::{CompilerError, Ice},
};

/// The second normalization pass.
///
/// The first pass leaves two kinds of stale references behind.
/// `Recursive` placeholders mark a lambda body naming its own
/// binding; they become ordinary dynamic free variables, growing the
/// free list of each lambda on the way out to the binding. And a name
/// the first pass classified as a compile-time constant stops being
/// one the moment its lambda claims a self capture (the value is a
/// closure now, not a bare code address), so `ConstantFree`
/// references to such names are rewritten into captures as well and
/// threaded outward the same way.
///
/// Runs post-order, since whether a lambda needs a capture slot for
/// its own name is only known once its whole body has been seen.
/// A lambda that does ends up with a `self_slot`: the position in its
/// free list that the code generator patches with `set_cl_val` after
/// the closure record is allocated.
pub fn resolve(nst: Nst) -> Result<Nst, CompilerError> {
    let mut nst = nst;
    let pending = frame(&mut nst, &[]);

    if let Some(name) = pending.first() {
        return Err(Ice::new(&format!(
            "recursive reference `{}` escaped the scope that binds it",
            name
        ))
        .into());
    }
    Ok(nst)
}

/// Walks one function body. Returns the names the frame needs from
/// its enclosing scope, which its lambda must capture. A name bound
/// by a `Let` of the frame itself is satisfied locally and dropped.
/// `recursive` carries the bindings known, on the way in, to hold
/// self-recursive closures.
fn frame(nst: &mut Nst, recursive: &[String]) -> Vec<String> {
    let mut pending = vec![];
    let mut bound = vec![];
    let mut recursive = recursive.to_vec();
    walk(nst, &mut pending, &mut bound, &mut recursive);
    return pending;
}

fn walk(
    nst: &mut Nst,
    pending: &mut Vec<String>,
    bound: &mut Vec<String>,
    recursive: &mut Vec<String>,
) {
    match nst {
        Nst::Let { name, atom, body } => {
            // the let's own name claims recursion inside a lambda
            // bound directly to it
            atom_walk(atom, Some(name.as_str()), pending, bound, recursive);

            // a rebinding hides any earlier recursive function of the
            // same name; a claimed self slot registers a new one
            recursive.retain(|r| r.as_str() != name.as_str());
            if let Atom::Lambda(lambda) = &*atom {
                if let Some(slot) = lambda.self_slot {
                    if lambda.free[slot] == *name {
                        recursive.push(name.clone());
                    }
                }
            }

            bound.push(name.clone());
            walk(body, pending, bound, recursive);
        }
        Nst::Atom(atom) => atom_walk(atom, None, pending, bound, recursive),
    }
}

fn atom_walk(
    atom: &mut Atom,
    binding: Option<&str>,
    pending: &mut Vec<String>,
    bound: &[String],
    recursive: &[String],
) {
    match atom {
        Atom::Var(var) if var.kind == VarKind::Recursive => {
            var.kind = VarKind::DynamicFree;
            note_pending(pending, bound, &var.name);
        }

        // a constant reference to a function that turned out to be
        // recursive has to ride a capture instead
        Atom::Var(var)
            if var.kind == VarKind::ConstantFree
                && recursive.iter().any(|r| r == &var.name) =>
        {
            var.kind = VarKind::DynamicFree;
            note_pending(pending, bound, &var.name);
        }

        Atom::Lambda(lambda) => lambda_walk(lambda, binding, pending, bound, recursive),

        Atom::Match { branches, .. } => {
            for branch in branches {
                branch_walk(branch, pending, bound, recursive);
            }
        }

        _ => (),
    }
}

fn lambda_walk(
    lambda: &mut Lambda,
    binding: Option<&str>,
    pending: &mut Vec<String>,
    bound: &[String],
    recursive: &[String],
) {
    let inner = frame(&mut lambda.body, recursive);

    for name in inner {
        if !lambda.free.contains(&name) {
            lambda.free.push(name.clone());
        }

        // the name this lambda is bound to resolves here: the slot is
        // patched with the closure itself once it exists. Anything
        // else keeps bubbling outward.
        if binding == Some(name.as_str()) || lambda.name.as_deref() == Some(name.as_str()) {
            let slot = lambda.free.iter().position(|f| f == &name).unwrap();
            lambda.self_slot = Some(slot);
        } else {
            note_pending(pending, bound, &name);
        }
    }
}

fn branch_walk(
    branch: &mut MatchBranch,
    pending: &mut Vec<String>,
    bound: &[String],
    recursive: &[String],
) {
    let inner = frame(&mut branch.body, recursive);

    // a branch has no name of its own; everything propagates
    for name in inner {
        if !branch.free.contains(&name) {
            branch.free.push(name.clone());
        }
        note_pending(pending, bound, &name);
    }
}

fn note_pending(pending: &mut Vec<String>, bound: &[String], name: &str) {
    if bound.iter().any(|b| b == name) {
        return;
    }
    if !pending.iter().any(|p| p == name) {
        pending.push(name.to_string());
    }
}
