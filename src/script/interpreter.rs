//! Script Interpreter
//!
//! Walks a Document Tree, evaluating ECHO expressions on a working stack and
//! writing output through a `ResponseContext`. FOR loops push/pop their
//! variable on a `NamedMultiStack` shared across the whole tree walk.

use std::io::Write;

use thiserror::Error;

use crate::context::ResponseContext;
use crate::error::ServerError;
use crate::script::parser::{DocNode, Element, ForLoop, Operator};
use crate::stack::{EmptyStack, NamedMultiStack};
use crate::value::{NumericError, NumericValue};

#[derive(Error, Debug)]
pub enum InterpError {
    #[error("unknown function: {0:?}")]
    UnknownFunction(String),

    #[error(transparent)]
    EmptyStack(#[from] EmptyStack),

    #[error(transparent)]
    Numeric(#[from] NumericError),

    #[error("working stack element is not the expected type")]
    WrongType,

    #[error(transparent)]
    Context(#[from] ServerError),
}

pub struct Interpreter {
    loop_vars: NamedMultiStack,
}

impl Interpreter {
    pub fn new() -> Self {
        Self {
            loop_vars: NamedMultiStack::new(),
        }
    }

    pub fn run<W: Write>(
        &mut self,
        doc: &DocNode,
        ctx: &mut ResponseContext<W>,
    ) -> Result<(), InterpError> {
        self.visit(doc, ctx)
    }

    fn visit<W: Write>(
        &mut self,
        node: &DocNode,
        ctx: &mut ResponseContext<W>,
    ) -> Result<(), InterpError> {
        match node {
            DocNode::Document(children) => {
                for c in children {
                    self.visit(c, ctx)?;
                }
                Ok(())
            }
            DocNode::Text(s) => {
                ctx.write_str(s)?;
                Ok(())
            }
            DocNode::ForLoop(f) => self.visit_for(f, ctx),
            DocNode::Echo(elements) => self.visit_echo(elements, ctx),
        }
    }

    fn visit_for<W: Write>(
        &mut self,
        f: &ForLoop,
        ctx: &mut ResponseContext<W>,
    ) -> Result<(), InterpError> {
        let start = self.eval_scalar(&f.start)?;
        let end = self.eval_scalar(&f.end)?;
        let step = self.eval_scalar(&f.step)?;

        self.loop_vars.push(&f.var, start);
        loop {
            let current = self.loop_vars.peek(&f.var)?;
            if current.compare(&end)? == std::cmp::Ordering::Greater {
                break;
            }
            for child in &f.body {
                self.visit(child, ctx)?;
            }
            let mut v = self.loop_vars.pop(&f.var)?;
            v.increment(&step)?;
            self.loop_vars.push(&f.var, v);
        }
        self.loop_vars.pop(&f.var)?;
        Ok(())
    }

    /// Resolve a FOR slot (variable / string / number) to a concrete value.
    fn eval_scalar(&self, el: &Element) -> Result<NumericValue, InterpError> {
        match el {
            Element::Int(i) => Ok(NumericValue::Int(*i)),
            Element::Double(d) => Ok(NumericValue::Double(*d)),
            Element::Str(s) => Ok(NumericValue::Str(s.clone())),
            Element::Variable(name) => Ok(self.loop_vars.peek(name)?),
            Element::Function(_) | Element::Operator(_) => Err(InterpError::WrongType),
        }
    }

    fn visit_echo<W: Write>(
        &mut self,
        elements: &[Element],
        ctx: &mut ResponseContext<W>,
    ) -> Result<(), InterpError> {
        let mut working: Vec<NumericValue> = Vec::new();
        for el in elements {
            match el {
                Element::Int(i) => working.push(NumericValue::Int(*i)),
                Element::Double(d) => working.push(NumericValue::Double(*d)),
                Element::Str(s) => working.push(NumericValue::Str(s.clone())),
                Element::Variable(name) => working.push(self.loop_vars.peek(name)?),
                Element::Operator(op) => {
                    let rhs = pop_working(&mut working)?;
                    let lhs = pop_working(&mut working)?;
                    working.push(apply_operator(lhs, op, rhs)?);
                }
                Element::Function(name) => {
                    call_function(name, &mut working, ctx)?;
                }
            }
        }
        for v in working {
            ctx.write_str(&v.to_output_string())?;
        }
        Ok(())
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply a binary operator in conventional `lhs OP rhs` order. See §9: the
/// source implementation pops right-then-left and effectively computes
/// `rhs OP lhs`; this implementation takes the conventional order instead.
fn apply_operator(
    lhs: NumericValue,
    op: &Operator,
    rhs: NumericValue,
) -> Result<NumericValue, InterpError> {
    let mut result = lhs;
    match op {
        Operator::Add => result.increment(&rhs)?,
        Operator::Sub => result.decrement(&rhs)?,
        Operator::Mul => result.multiply(&rhs)?,
        Operator::Div => result.divide(&rhs)?,
        Operator::Pow => result.power(&rhs)?,
    }
    Ok(result)
}

/// Pop the working stack, surfacing underflow as `EmptyStack` — the same
/// error kind the Named Multi-Stack raises, not just loop-variable lookups.
fn pop_working(working: &mut Vec<NumericValue>) -> Result<NumericValue, InterpError> {
    working
        .pop()
        .ok_or_else(|| EmptyStack("<echo working stack>".to_string()).into())
}

fn pop_string(working: &mut Vec<NumericValue>) -> Result<String, InterpError> {
    Ok(pop_working(working)?.to_output_string())
}

fn call_function<W: Write>(
    name: &str,
    working: &mut Vec<NumericValue>,
    ctx: &mut ResponseContext<W>,
) -> Result<(), InterpError> {
    match name {
        "sin" => {
            let x = pop_working(working)?;
            let radians = x.to_f64()? * std::f64::consts::PI / 180.0;
            working.push(NumericValue::Double(radians.sin()));
        }
        "decfmt" => {
            let fmt = pop_string(working)?;
            let x = pop_working(working)?;
            working.push(NumericValue::Str(decimal_format(x.to_f64()?, &fmt)));
        }
        "dup" => {
            let top = working
                .last()
                .cloned()
                .ok_or_else(|| EmptyStack("<echo working stack>".to_string()))?;
            working.push(top);
        }
        "swap" => {
            let a = pop_working(working)?;
            let b = pop_working(working)?;
            working.push(a);
            working.push(b);
        }
        "setMimeType" => {
            let m = pop_string(working)?;
            ctx.set_mime_type(m)?;
        }
        "paramGet" => {
            let default = pop_string(working)?;
            let key = pop_string(working)?;
            let v = ctx
                .get_parameter(&key)
                .map(str::to_string)
                .unwrap_or(default);
            working.push(NumericValue::Str(v));
        }
        "pparamGet" => {
            let default = pop_string(working)?;
            let key = pop_string(working)?;
            working.push(NumericValue::Str(ctx.get_persistent_parameter(&key, &default)));
        }
        "pparamSet" => {
            let key = pop_string(working)?;
            let value = pop_string(working)?;
            ctx.set_persistent_parameter(&key, &value)?;
        }
        "pparamDel" => {
            let key = pop_string(working)?;
            ctx.remove_persistent_parameter(&key)?;
        }
        "tparamGet" => {
            let default = pop_string(working)?;
            let key = pop_string(working)?;
            working.push(NumericValue::Str(ctx.get_temporary_parameter(&key, &default)));
        }
        "tparamSet" => {
            let key = pop_string(working)?;
            let value = pop_string(working)?;
            ctx.set_temporary_parameter(&key, &value)?;
        }
        "tparamDel" => {
            let key = pop_string(working)?;
            ctx.remove_temporary_parameter(&key)?;
        }
        other => return Err(InterpError::UnknownFunction(other.to_string())),
    }
    Ok(())
}

/// Locale-independent decimal formatter: `fmt` is a `#.0`-style pattern whose
/// digit count after the `.` fixes the number of decimal places, always
/// rendered with a `.` regardless of the host locale.
fn decimal_format(x: f64, fmt: &str) -> String {
    let decimals = match fmt.split_once('.') {
        Some((_, frac)) => frac.chars().filter(|c| *c == '0' || *c == '#').count(),
        None => 0,
    };
    format!("{:.*}", decimals, x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::parser::parse;
    use dashmap::DashMap;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn run_script(src: &str, params: HashMap<String, Option<String>>) -> String {
        let tree = parse(src).unwrap();
        let mut ctx = ResponseContext::new(Vec::new(), params, Arc::new(DashMap::new()));
        let mut interp = Interpreter::new();
        interp.run(&tree, &mut ctx).unwrap();
        let bytes = ctx.into_sink();
        let full = String::from_utf8(bytes).unwrap();
        full.split("\r\n\r\n").nth(1).unwrap().to_string()
    }

    #[test]
    fn scenario_a_basic_for_loop() {
        let out = run_script(
            "{$ FOR i 1 3 1 $}i={$= i $}\n{$ END $}",
            HashMap::new(),
        );
        assert_eq!(out, "i=1\ni=2\ni=3\n");
    }

    #[test]
    fn scenario_c_integer_division() {
        assert_eq!(run_script("{$= 3 2 / $}", HashMap::new()), "1");
    }

    #[test]
    fn scenario_c_double_promotion() {
        assert_eq!(run_script("{$= 3.0 2 / $}", HashMap::new()), "1.5");
    }

    #[test]
    fn scenario_d_persistent_round_trip() {
        let persistent = Arc::new(DashMap::new());
        persistent.insert("count".to_string(), "3".to_string());
        let tree = parse(r#"{$= "count" "0" @pparamGet 1 + "count" @pparamSet $}"#).unwrap();
        let mut ctx = ResponseContext::new(Vec::new(), HashMap::new(), persistent.clone());
        let mut interp = Interpreter::new();
        interp.run(&tree, &mut ctx).unwrap();
        assert_eq!(persistent.get("count").unwrap().clone(), "4");
    }

    #[test]
    fn param_get_addition() {
        let mut params = HashMap::new();
        params.insert("a".to_string(), Some("4".to_string()));
        params.insert("b".to_string(), Some("2".to_string()));
        let out = run_script(
            r#"{$= "a+b=" "a" "0" @paramGet "b" "0" @paramGet + $}"#,
            params,
        );
        assert_eq!(out, "a+b=6");
    }

    #[test]
    fn for_loop_restores_stack_depth() {
        let tree = parse("{$ FOR i 1 3 1 $}{$ END $}").unwrap();
        let mut ctx = ResponseContext::new(Vec::new(), HashMap::new(), Arc::new(DashMap::new()));
        let mut interp = Interpreter::new();
        interp.run(&tree, &mut ctx).unwrap();
        assert_eq!(interp.loop_vars.depth("i"), 0);
    }

    #[test]
    fn unknown_function_fails() {
        let tree = parse("{$= 1 @bogus $}").unwrap();
        let mut ctx = ResponseContext::new(Vec::new(), HashMap::new(), Arc::new(DashMap::new()));
        let mut interp = Interpreter::new();
        assert!(matches!(
            interp.run(&tree, &mut ctx),
            Err(InterpError::UnknownFunction(_))
        ));
    }

    #[test]
    fn power_operator_is_floating_point() {
        assert_eq!(run_script("{$= 2 3 ^ $}", HashMap::new()), "8.0");
    }

    #[test]
    fn decfmt_uses_dot_decimal() {
        assert_eq!(run_script(r#"{$= 3.14159 "#.00" @decfmt $}"#, HashMap::new()), "3.14");
    }

    #[test]
    fn dup_and_swap() {
        assert_eq!(run_script("{$= 1 2 @swap $}", HashMap::new()), "21");
        assert_eq!(run_script("{$= 5 @dup $}", HashMap::new()), "55");
    }

    #[test]
    fn working_stack_underflow_is_empty_stack_not_wrong_type() {
        let tree = parse("{$= + $}").unwrap();
        let mut ctx = ResponseContext::new(Vec::new(), HashMap::new(), Arc::new(DashMap::new()));
        let mut interp = Interpreter::new();
        assert!(matches!(
            interp.run(&tree, &mut ctx),
            Err(InterpError::EmptyStack(_))
        ));

        let tree = parse("{$= @dup $}").unwrap();
        let mut ctx = ResponseContext::new(Vec::new(), HashMap::new(), Arc::new(DashMap::new()));
        let mut interp = Interpreter::new();
        assert!(matches!(
            interp.run(&tree, &mut ctx),
            Err(InterpError::EmptyStack(_))
        ));
    }
}
