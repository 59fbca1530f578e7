//! C5 — axiom compilation: layered fixed-point construction of each derived
//! variable's `primary_rep`, a BDD expressed purely over non-derived
//! ("primary") variables.

use dd::bdd;
use dd::{DdResult, Handle, Terminal};
use hashbrown::HashMap;
use symvars::{SymVariables, VarId};

/// `head_var = head_val` if every literal in `body` holds.
#[derive(Clone, Debug)]
pub struct Axiom {
    pub head_var: VarId,
    pub head_val: u32,
    pub body: Vec<Literal>,
    pub layer: u32,
}

/// `var = val`, read either off a primary variable's pre-copy or off a
/// lower/same-layer derived variable's `primary_rep`.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Literal {
    pub var: VarId,
    pub val: u32,
}

/// Compiles axioms into each derived variable's `primary_rep`, borrowing the
/// task's variable layout rather than owning a copy of it.
pub struct AxiomCompiler<'v> {
    vars: &'v SymVariables,
    by_layer: Vec<Vec<Axiom>>,
    default_val: HashMap<VarId, u32>,
}

impl<'v> AxiomCompiler<'v> {
    /// `default_val` gives each derived variable's value when no axiom
    /// fires; variables absent from the map default to `0`.
    pub fn new(vars: &'v SymVariables, axioms: &[Axiom], default_val: HashMap<VarId, u32>) -> Self {
        let max_layer = axioms.iter().map(|a| a.layer).max().unwrap_or(0);
        let mut by_layer = vec![Vec::new(); max_layer as usize + 1];
        for axiom in axioms {
            // trivial axioms (head value equals the default) never move
            // primary_rep away from bottom and are skipped.
            let default = *default_val.get(&axiom.head_var).unwrap_or(&0);
            if axiom.head_val == default {
                continue;
            }
            by_layer[axiom.layer as usize].push(axiom.clone());
        }
        AxiomCompiler { vars, by_layer, default_val }
    }

    fn default_of(&self, v: VarId) -> u32 {
        *self.default_val.get(&v).unwrap_or(&0)
    }

    fn literal_bdd(&self, lit: Literal, primary_rep: &HashMap<VarId, Handle>) -> DdResult<Handle> {
        if self.vars.is_derived(lit.var) {
            let rep = primary_rep.get(&lit.var).copied().unwrap_or(Handle::Terminal(Terminal::Bool(false)));
            if lit.val == self.default_of(lit.var) {
                bdd::not(&mut self.vars_forest_borrow(), rep)
            } else {
                Ok(rep)
            }
        } else {
            self.vars.pre_bdd(lit.var, lit.val)
        }
    }

    fn vars_forest_borrow(&self) -> std::cell::RefMut<'_, dd::Forest> {
        self.vars.forest_handle().borrow_mut()
    }

    fn body_bdd(&self, axiom: &Axiom, primary_rep: &HashMap<VarId, Handle>) -> DdResult<Handle> {
        let mut acc = Handle::Terminal(Terminal::Bool(true));
        for &lit in &axiom.body {
            let lit_bdd = self.literal_bdd(lit, primary_rep)?;
            acc = bdd::and(&mut self.vars_forest_borrow(), acc, lit_bdd)?;
        }
        Ok(acc)
    }

    /// Runs the layered fixed point and returns each derived variable's
    /// `primary_rep`. Variables with no axioms at all are absent from the
    /// map (treat as the constant-default representation).
    pub fn compile(&self) -> DdResult<HashMap<VarId, Handle>> {
        let mut primary_rep: HashMap<VarId, Handle> = HashMap::new();
        for (layer_idx, layer_axioms) in self.by_layer.iter().enumerate() {
            let mut iterations = 0;
            loop {
                let mut changed = false;
                for axiom in layer_axioms {
                    let body = self.body_bdd(axiom, &primary_rep)?;
                    let prev = primary_rep.get(&axiom.head_var).copied().unwrap_or(Handle::Terminal(Terminal::Bool(false)));
                    let updated = bdd::or(&mut self.vars_forest_borrow(), prev, body)?;
                    if updated != prev {
                        primary_rep.insert(axiom.head_var, updated);
                        changed = true;
                    }
                }
                iterations += 1;
                if !changed {
                    break;
                }
            }
            tracing::debug!(layer = layer_idx, axioms = layer_axioms.len(), iterations, "axiom layer reached fixed point");
        }
        Ok(primary_rep)
    }

    /// `primary_rep(v)` if `val` is non-default, else its negation.
    pub fn primary_representation(&self, primary_rep: &HashMap<VarId, Handle>, v: VarId, val: u32) -> DdResult<Handle> {
        let rep = primary_rep.get(&v).copied().unwrap_or(Handle::Terminal(Terminal::Bool(false)));
        if val == self.default_of(v) {
            bdd::not(&mut self.vars_forest_borrow(), rep)
        } else {
            Ok(rep)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dd::{ClassicStorage, Forest, GcPolicy, Grid, RangeType, Reduction};

    fn setup() -> SymVariables {
        let forest = Forest::new(RangeType::Boolean, Reduction::Fully, GcPolicy::Optimistic, Box::new(Grid::default()), Box::new(ClassicStorage));
        // p, q, r primary (boolean), d1, d2 derived (boolean)
        SymVariables::build(forest, &[2, 2, 2, 2, 2], &[false, false, false, true, true], &[0, 1, 2, 3, 4], 0).unwrap()
    }

    #[test]
    fn fixed_point_over_two_layers_matches_expected_formula() {
        let vars = setup();
        let p = VarId::from_index(0);
        let q = VarId::from_index(1);
        let r = VarId::from_index(2);
        let d1 = VarId::from_index(3);
        let d2 = VarId::from_index(4);

        let axioms = vec![
            Axiom { head_var: d1, head_val: 1, body: vec![Literal { var: p, val: 1 }], layer: 0 },
            Axiom { head_var: d1, head_val: 1, body: vec![Literal { var: q, val: 1 }], layer: 0 },
            Axiom { head_var: d2, head_val: 1, body: vec![Literal { var: d1, val: 1 }, Literal { var: r, val: 1 }], layer: 1 },
        ];
        let compiler = AxiomCompiler::new(&vars, &axioms, HashMap::new());
        let rep = compiler.compile().unwrap();

        let p_or_q = {
            let pb = vars.pre_bdd(p, 1).unwrap();
            let qb = vars.pre_bdd(q, 1).unwrap();
            let mut f = vars.forest_handle().borrow_mut();
            bdd::or(&mut f, pb, qb).unwrap()
        };
        assert_eq!(rep[&d1], p_or_q);

        let expected_d2 = {
            let rb = vars.pre_bdd(r, 1).unwrap();
            let mut f = vars.forest_handle().borrow_mut();
            bdd::and(&mut f, p_or_q, rb).unwrap()
        };
        assert_eq!(rep[&d2], expected_d2);
    }

    #[test]
    fn trivial_axiom_matching_default_is_skipped() {
        let vars = setup();
        let p = VarId::from_index(0);
        let d1 = VarId::from_index(3);
        let axioms = vec![Axiom { head_var: d1, head_val: 0, body: vec![Literal { var: p, val: 1 }], layer: 0 }];
        let compiler = AxiomCompiler::new(&vars, &axioms, HashMap::new());
        let rep = compiler.compile().unwrap();
        assert!(!rep.contains_key(&d1));
    }
}
