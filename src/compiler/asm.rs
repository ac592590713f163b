//! JSON program assembler.
//!
//! A `ProgramSource` is a tree of operations over named variables. Blocks
//! scope their `let` bindings, `try` nests its handlers, and `closure`
//! nests a body that captures outer variables by name. `assemble` lowers
//! the tree onto an `InstructionList`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::instructions::InstructionList;
use super::label::LabelId;
use super::locals::{LocalDefinition, LocalVariable, LocalVariables};
use crate::vm::numeric::{BinaryOp, CompareOp, NumericKind, UnaryOp};
use crate::vm::{
    BuildError, ByRefUpdater, Capture, Category, ErrorKind, Exception, Instruction, Method,
    NativeMethod, ObjectField, ObjectProperty, ObjectRef, Program, Value,
};

fn default_name() -> String {
    "main".to_string()
}

fn default_category() -> String {
    "any".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgramSource {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub parameters: Vec<String>,
    pub body: Vec<Op>,
}

impl ProgramSource {
    pub fn from_json(source: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(source)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    Const {
        #[serde(default)]
        kind: Option<NumericKind>,
        value: serde_json::Value,
    },
    Pop,
    Dup,
    Block {
        body: Vec<Op>,
    },
    /// Pop the top value into a new variable.
    Let {
        name: String,
    },
    Load {
        name: String,
    },
    Store {
        name: String,
    },
    Assign {
        name: String,
    },
    Box {
        name: String,
    },
    Binary {
        operator: BinaryOp,
        kind: NumericKind,
        #[serde(default)]
        checked: bool,
    },
    Unary {
        operator: UnaryOp,
        kind: NumericKind,
        #[serde(default)]
        checked: bool,
    },
    Compare {
        operator: CompareOp,
        kind: NumericKind,
        #[serde(default)]
        lifted: bool,
    },
    Convert {
        from: NumericKind,
        to: NumericKind,
        #[serde(default)]
        checked: bool,
    },
    Equal,
    NotEqual,
    Label {
        name: String,
    },
    Branch {
        label: String,
    },
    BranchTrue {
        label: String,
    },
    BranchFalse {
        label: String,
    },
    Goto {
        label: String,
        #[serde(default)]
        value: bool,
    },
    Return {
        #[serde(default)]
        value: bool,
    },
    Throw,
    Rethrow,
    NewError {
        kind: String,
    },
    ErrorPayload,
    Try {
        body: Vec<Op>,
        #[serde(default)]
        catches: Vec<CatchSource>,
        #[serde(default)]
        finally: Option<Vec<Op>>,
    },
    Call {
        method: String,
    },
    CallByRef {
        method: String,
        refs: Vec<RefSource>,
    },
    GetField {
        name: String,
    },
    SetField {
        name: String,
    },
    GetProperty {
        name: String,
    },
    SetProperty {
        name: String,
        #[serde(default)]
        read_only: bool,
    },
    NewArray,
    NewArrayInit {
        count: usize,
    },
    GetItem,
    SetItem,
    ArrayLength,
    Closure {
        #[serde(default)]
        parameters: Vec<String>,
        #[serde(default)]
        captures: Vec<String>,
        body: Vec<Op>,
    },
    Invoke {
        argc: usize,
    },
    Line {
        start: u32,
        #[serde(default)]
        end: Option<u32>,
        #[serde(default)]
        file: Option<String>,
    },
    ClearLine,
}

/// A catch clause. The error is bound to `variable` (or dropped) before the
/// filter and again before the body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatchSource {
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub variable: Option<String>,
    #[serde(default)]
    pub filter: Option<Vec<Op>>,
    pub body: Vec<Op>,
}

/// Where a by-reference argument is written back to. Operands name plain
/// locals holding the values evaluated before the call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RefSource {
    Local {
        argument: usize,
        name: String,
    },
    Element {
        argument: usize,
        array: String,
        index: String,
    },
    Field {
        argument: usize,
        target: String,
        field: String,
    },
    Property {
        argument: usize,
        target: String,
        property: String,
    },
    Indexer {
        argument: usize,
        target: String,
        setter: String,
        indexes: Vec<String>,
    },
}

/// Host methods callable by name.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    methods: HashMap<String, Arc<dyn Method>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `print`, `to_string`, and `new_object`.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(
            NativeMethod::new("print", 1, |args| {
                println!("{}", args[0]);
                Ok(Value::Null)
            })
            .void(),
        ));
        registry.register(Arc::new(NativeMethod::new("to_string", 1, |args| {
            Ok(Value::str(&args[0].to_string()))
        })));
        registry.register(Arc::new(NativeMethod::new("new_object", 1, |args| {
            match &args[0] {
                Value::Str(class) => Ok(Value::Object(ObjectRef::new(class))),
                other => Err(Exception::invalid_cast("string", other)),
            }
        })));
        registry
    }

    pub fn register(&mut self, method: Arc<dyn Method>) {
        self.methods.insert(method.name().to_string(), method);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Method>> {
        self.methods.get(name)
    }
}

pub fn assemble(source: &ProgramSource, registry: &Registry) -> Result<Program, BuildError> {
    assemble_body(&source.name, &source.parameters, &[], &source.body, registry)
}

fn assemble_body(
    name: &str,
    parameters: &[String],
    captures: &[String],
    body: &[Op],
    registry: &Registry,
) -> Result<Program, BuildError> {
    let mut asm = Assembler {
        name,
        list: InstructionList::new(),
        locals: LocalVariables::new(),
        labels: HashMap::new(),
        marked: HashSet::new(),
        registry,
        closures: 0,
    };
    for (index, capture) in captures.iter().enumerate() {
        asm.locals.add_closure_variable(capture.clone(), index);
    }
    for parameter in parameters {
        asm.locals.define_local(parameter.clone(), asm.list.count());
        let variable = asm.variable(parameter)?;
        asm.list.emit_init_parameter(&variable)?;
    }
    asm.block(body)?;
    asm.finish(parameters.len())
}

struct Assembler<'a> {
    name: &'a str,
    list: InstructionList,
    locals: LocalVariables<String>,
    labels: HashMap<String, LabelId>,
    marked: HashSet<String>,
    registry: &'a Registry,
    closures: usize,
}

impl Assembler<'_> {
    fn finish(self, parameter_count: usize) -> Result<Program, BuildError> {
        if let Some(name) = self.labels.keys().find(|name| !self.marked.contains(*name)) {
            return Err(BuildError::UnknownLabel(name.clone()));
        }
        let local_count = self.locals.local_count();
        self.list.finish(self.name, local_count, parameter_count)
    }

    fn variable(&self, name: &str) -> Result<LocalVariable, BuildError> {
        self.locals
            .get(name)
            .ok_or_else(|| BuildError::UnknownVariable(name.to_string()))
    }

    /// A plain local holding a by-reference operand.
    fn operand(&self, name: &str) -> Result<usize, BuildError> {
        let variable = self.variable(name)?;
        if variable.in_closure || variable.is_boxed {
            return Err(BuildError::ByRefOperand(name.to_string()));
        }
        Ok(variable.index)
    }

    fn method(&self, name: &str) -> Result<Arc<dyn Method>, BuildError> {
        self.registry
            .get(name)
            .cloned()
            .ok_or_else(|| BuildError::UnknownMethod(name.to_string()))
    }

    fn label(&mut self, name: &str) -> LabelId {
        if let Some(label) = self.labels.get(name) {
            return *label;
        }
        let label = self.list.make_label();
        self.labels.insert(name.to_string(), label);
        label
    }

    fn block(&mut self, body: &[Op]) -> Result<(), BuildError> {
        self.scoped(None, body)
    }

    /// Run `body` in a new scope. With `binding`, the top value (the caught
    /// error) is first popped into that variable; `Some(None)` drops it.
    fn scoped(&mut self, binding: Option<Option<&str>>, body: &[Op]) -> Result<(), BuildError> {
        let mut defined = Vec::new();
        match binding {
            Some(Some(name)) => {
                let variable = self.bind(name, &mut defined)?;
                self.list.emit_store_local(&variable)?;
            }
            Some(None) => {
                self.list.emit_pop()?;
            }
            None => {}
        }
        for op in body {
            self.op(op, &mut defined)?;
        }
        let end = self.list.count();
        for definition in defined.into_iter().rev() {
            self.locals.undefine_local(definition, end);
        }
        Ok(())
    }

    fn bind(
        &mut self,
        name: &str,
        defined: &mut Vec<LocalDefinition>,
    ) -> Result<LocalVariable, BuildError> {
        defined.push(self.locals.define_local(name.to_string(), self.list.count()));
        let variable = self.variable(name)?;
        self.list.emit_init_local(&variable)?;
        Ok(variable)
    }

    fn op(&mut self, op: &Op, defined: &mut Vec<LocalDefinition>) -> Result<(), BuildError> {
        match op {
            Op::Const { kind, value } => {
                self.list.emit_load(constant(*kind, value)?)?;
            }
            Op::Pop => {
                self.list.emit_pop()?;
            }
            Op::Dup => {
                self.list.emit_dup()?;
            }
            Op::Block { body } => self.block(body)?,
            Op::Let { name } => {
                let variable = self.bind(name, defined)?;
                self.list.emit_store_local(&variable)?;
            }
            Op::Load { name } => {
                let variable = self.variable(name)?;
                self.list.emit_load_local(&variable)?;
            }
            Op::Store { name } => {
                let variable = self.variable(name)?;
                self.list.emit_store_local(&variable)?;
            }
            Op::Assign { name } => {
                let variable = self.variable(name)?;
                self.list.emit_assign_local(&variable)?;
            }
            Op::Box { name } => self.locals.box_variable(name.as_str(), &mut self.list)?,
            Op::Binary {
                operator,
                kind,
                checked,
            } => {
                self.list.emit_binary(*operator, *kind, *checked)?;
            }
            Op::Unary {
                operator,
                kind,
                checked,
            } => {
                self.list.emit_unary(*operator, *kind, *checked)?;
            }
            Op::Compare {
                operator,
                kind,
                lifted,
            } => {
                self.list.emit_compare(*operator, *kind, *lifted)?;
            }
            Op::Convert { from, to, checked } => {
                self.list.emit_convert(*from, *to, *checked)?;
            }
            Op::Equal => {
                self.list.emit(Instruction::ValueEqual)?;
            }
            Op::NotEqual => {
                self.list.emit(Instruction::ValueNotEqual)?;
            }
            Op::Label { name } => {
                let label = self.label(name);
                self.marked.insert(name.clone());
                self.list.mark_label(label)?;
            }
            Op::Branch { label } => {
                let label = self.label(label);
                self.list.emit_branch(label)?;
            }
            Op::BranchTrue { label } => {
                let label = self.label(label);
                self.list.emit_branch_true(label)?;
            }
            Op::BranchFalse { label } => {
                let label = self.label(label);
                self.list.emit_branch_false(label)?;
            }
            Op::Goto { label, value } => {
                let label = self.label(label);
                self.list.emit_goto(label, *value)?;
            }
            Op::Return { value } => {
                self.list.emit_return(*value)?;
            }
            Op::Throw => {
                self.list.emit_throw()?;
            }
            Op::Rethrow => {
                self.list.emit_rethrow()?;
            }
            Op::NewError { kind } => {
                let kind = kind
                    .parse::<ErrorKind>()
                    .unwrap_or_else(|never| match never {});
                self.list.emit(Instruction::NewError(kind))?;
            }
            Op::ErrorPayload => {
                self.list.emit(Instruction::ErrorPayload)?;
            }
            Op::Try {
                body,
                catches,
                finally,
            } => self.try_block(body, catches, finally.as_deref())?,
            Op::Call { method } => {
                let method = self.method(method)?;
                self.list.emit_call(method)?;
            }
            Op::CallByRef { method, refs } => {
                let method = self.method(method)?;
                let updaters = refs
                    .iter()
                    .map(|r| self.updater(r))
                    .collect::<Result<Vec<_>, _>>()?;
                self.list.emit_call_by_ref(method, updaters)?;
            }
            Op::GetField { name } => {
                self.list
                    .emit(Instruction::LoadField(Arc::new(ObjectField::new(name))))?;
            }
            Op::SetField { name } => {
                self.list
                    .emit(Instruction::StoreField(Arc::new(ObjectField::new(name))))?;
            }
            Op::GetProperty { name } => {
                self.list
                    .emit(Instruction::GetProperty(Arc::new(ObjectProperty::new(name))))?;
            }
            Op::SetProperty { name, read_only } => {
                let property = if *read_only {
                    ObjectProperty::read_only(name)
                } else {
                    ObjectProperty::new(name)
                };
                self.list.emit(Instruction::SetProperty(Arc::new(property)))?;
            }
            Op::NewArray => {
                self.list.emit(Instruction::NewArray)?;
            }
            Op::NewArrayInit { count } => {
                self.list.emit(Instruction::NewArrayInit(*count))?;
            }
            Op::GetItem => {
                self.list.emit(Instruction::GetArrayItem)?;
            }
            Op::SetItem => {
                self.list.emit(Instruction::SetArrayItem)?;
            }
            Op::ArrayLength => {
                self.list.emit(Instruction::ArrayLength)?;
            }
            Op::Closure {
                parameters,
                captures,
                body,
            } => self.closure(parameters, captures, body)?,
            Op::Invoke { argc } => {
                self.list.emit_invoke_closure(*argc)?;
            }
            Op::Line { start, end, file } => {
                self.list.add_debug_info(
                    *start,
                    end.unwrap_or(*start),
                    file.as_deref().map(Arc::from),
                );
            }
            Op::ClearLine => self.list.clear_debug_info(),
        }
        Ok(())
    }

    fn try_block(
        &mut self,
        body: &[Op],
        catches: &[CatchSource],
        finally: Option<&[Op]>,
    ) -> Result<(), BuildError> {
        let mut block = self.list.begin_try(finally.is_some())?;
        self.block(body)?;
        for catch in catches {
            let category = catch
                .category
                .parse::<Category>()
                .unwrap_or_else(|never| match never {});
            let binding = Some(catch.variable.as_deref());
            if let Some(filter) = &catch.filter {
                self.list.begin_filter(&mut block)?;
                self.scoped(binding, filter)?;
            }
            self.list.begin_catch(&mut block, category)?;
            self.scoped(binding, &catch.body)?;
        }
        if let Some(finally) = finally {
            self.list.begin_finally(&mut block)?;
            self.block(finally)?;
        }
        self.list.end_try(block)
    }

    fn closure(
        &mut self,
        parameters: &[String],
        captures: &[String],
        body: &[Op],
    ) -> Result<(), BuildError> {
        let mut cells = Vec::with_capacity(captures.len());
        for name in captures {
            let variable = self.variable(name)?;
            if variable.in_closure {
                cells.push(Capture::Closure(variable.index));
            } else {
                self.locals.box_variable(name.as_str(), &mut self.list)?;
                cells.push(Capture::Local(variable.index));
            }
        }
        self.closures += 1;
        let name = format!("{}#{}", self.name, self.closures);
        let program = assemble_body(&name, parameters, captures, body, self.registry)?;
        self.list.emit_create_closure(Arc::new(program), cells)?;
        Ok(())
    }

    fn updater(&self, source: &RefSource) -> Result<ByRefUpdater, BuildError> {
        Ok(match source {
            RefSource::Local { argument, name } => ByRefUpdater::Local {
                slot: self.variable(name)?.slot(),
                argument: *argument,
            },
            RefSource::Element {
                argument,
                array,
                index,
            } => ByRefUpdater::ArrayElement {
                array: self.operand(array)?,
                index: self.operand(index)?,
                argument: *argument,
            },
            RefSource::Field {
                argument,
                target,
                field,
            } => ByRefUpdater::Field {
                target: self.operand(target)?,
                field: Arc::new(ObjectField::new(field)),
                argument: *argument,
            },
            RefSource::Property {
                argument,
                target,
                property,
            } => ByRefUpdater::Property {
                target: self.operand(target)?,
                property: Arc::new(ObjectProperty::new(property)),
                argument: *argument,
            },
            RefSource::Indexer {
                argument,
                target,
                setter,
                indexes,
            } => ByRefUpdater::Indexer {
                target: self.operand(target)?,
                setter: self.method(setter)?,
                indexes: indexes
                    .iter()
                    .map(|name| self.operand(name))
                    .collect::<Result<_, _>>()?,
                argument: *argument,
            },
        })
    }
}

/// Convert a JSON value to a runtime value, inferring the numeric kind.
pub fn json_value(value: &serde_json::Value) -> Result<Value, BuildError> {
    constant(None, value)
}

fn constant(kind: Option<NumericKind>, value: &serde_json::Value) -> Result<Value, BuildError> {
    use serde_json::Value as Json;

    let invalid = || {
        let kind = kind.map_or("value", NumericKind::name);
        BuildError::InvalidConstant(format!("{} is not a valid {}", value, kind))
    };

    let Some(kind) = kind else {
        return match value {
            Json::Null => Ok(Value::Null),
            Json::Bool(b) => Ok(Value::Bool(*b)),
            Json::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(i32::try_from(i).map_or(Value::I64(i), Value::I32))
                } else if let Some(u) = n.as_u64() {
                    Ok(Value::U64(u))
                } else {
                    n.as_f64().map(Value::F64).ok_or_else(invalid)
                }
            }
            Json::String(s) => Ok(Value::str(s)),
            Json::Array(items) => Ok(Value::array(
                items
                    .iter()
                    .map(|item| constant(None, item))
                    .collect::<Result<_, _>>()?,
            )),
            Json::Object(_) => Err(invalid()),
        };
    };
    if value.is_null() {
        return Ok(Value::Null);
    }

    macro_rules! int {
        ($ty:ty, $variant:ident) => {
            value
                .as_i64()
                .and_then(|i| <$ty>::try_from(i).ok())
                .map(Value::$variant)
        };
    }

    let converted = match kind {
        NumericKind::I8 => int!(i8, I8),
        NumericKind::I16 => int!(i16, I16),
        NumericKind::I32 => int!(i32, I32),
        NumericKind::I64 => value.as_i64().map(Value::I64),
        NumericKind::U8 => int!(u8, U8),
        NumericKind::U16 => int!(u16, U16),
        NumericKind::U32 => int!(u32, U32),
        NumericKind::U64 => value.as_u64().map(Value::U64),
        NumericKind::F32 => value.as_f64().map(|f| Value::F32(f as f32)),
        NumericKind::F64 => value.as_f64().map(Value::F64),
        NumericKind::Bool => value.as_bool().map(Value::Bool),
    };
    converted.ok_or_else(invalid)
}
