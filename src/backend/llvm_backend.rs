use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::Path;

use inkwell::basic_block::BasicBlock;
use inkwell::builder::{Builder, BuilderError};
use inkwell::context::Context;
use inkwell::execution_engine::{ExecutionEngine, JitFunction};
use inkwell::module::{Linkage, Module};
use inkwell::passes::PassBuilderOptions;
use inkwell::targets::{
    CodeModel, FileType, InitializationConfig, RelocMode, Target, TargetMachine, TargetTriple,
};
use inkwell::types::{BasicMetadataTypeEnum, FloatType};
use inkwell::values::{
    BasicMetadataValueEnum, BasicValue, CallSiteValue, FloatValue, FunctionValue, IntValue,
    PointerValue,
};
use inkwell::{FloatPredicate, OptimizationLevel};
use thiserror::Error;

use crate::backend::scope::Scope;
use crate::frontend::ast::{
    Expr, ExprKind, Function, OperatorKind, Prototype, ANONYMOUS_FUNCTION_NAME,
};
use crate::frontend::ops::{OperatorTable, DEFAULT_PRECEDENCE};

type IRGenResult<'ctx> = Result<FloatValue<'ctx>, LowerError>;
type TopLevelSignature = unsafe extern "C" fn() -> f64;

// Errors the language itself defines: bad references, bad arities, bad
// assignment targets. Anything LLVM-side lives in BackendError below.
#[derive(Error, Debug)]
pub enum LowerError {
    #[error("unknown variable name '{0}'")]
    UnknownVariable(String),

    #[error("unknown function '{0}' referenced")]
    UnknownFunction(String),

    #[error("no overload defined for operator '{0}'")]
    UnknownOperator(char),

    #[error("function '{name}' takes {expected} arguments but {actual} were passed")]
    ArityMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("left side of '=' must be a variable")]
    InvalidAssignmentTarget,

    #[error("function '{0}' defined twice")]
    MultipleFunctionDefs(String),

    #[error("function '{name}' redefined with {actual} parameters, previously declared with {expected}")]
    PrototypeMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error(transparent)]
    Backend(#[from] BackendError),
}

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("LLVM failed to verify function '{0}'")]
    FailedToVerifyFunc(String),

    #[error("unsupported target triple '{0}'")]
    UnsupportedTarget(String),

    #[error("LLVM builder failure: {0}")]
    Builder(#[from] BuilderError),

    #[error("pass pipeline '{pipeline}' failed: {message}")]
    Passes { pipeline: String, message: String },

    #[error("JIT failure: {0}")]
    FailedToJIT(String),

    #[error("could not write output: {0}")]
    EmitFailed(String),
}

// Lets expression lowering use `?` straight off builder calls.
impl From<BuilderError> for LowerError {
    fn from(err: BuilderError) -> Self {
        LowerError::Backend(BackendError::Builder(err))
    }
}

/// Everything lowering needs in one place: the LLVM context, a builder, the
/// unit (module) currently being filled, the target machine, the variable
/// scope of the function being lowered, and the prototype registry that
/// carries signatures across units.
pub struct LLVMContext<'ctx> {
    context: &'ctx Context,
    builder: Builder<'ctx>,
    module: Module<'ctx>,
    machine: TargetMachine,
    scope: Scope<PointerValue<'ctx>>,
    protos: RefCell<HashMap<String, Prototype>>,
    units: usize,
    wrappers: Cell<usize>,
}

impl<'ctx> LLVMContext<'ctx> {
    /// Set up codegen for the host, or for `target_triple` when cross
    /// compiling. Host builds use the host CPU's features; cross builds
    /// stay generic.
    pub fn new(
        context: &'ctx Context,
        opt_level: OptimizationLevel,
        target_triple: Option<&str>,
    ) -> Result<Self, BackendError> {
        Target::initialize_all(&InitializationConfig::default());

        let triple = match target_triple {
            Some(name) => TargetTriple::create(name),
            None => TargetMachine::get_default_triple(),
        };
        let unsupported = || {
            BackendError::UnsupportedTarget(triple.as_str().to_string_lossy().into_owned())
        };

        let target = Target::from_triple(&triple).map_err(|_| unsupported())?;
        let (cpu, features) = match target_triple {
            Some(_) => (String::from("generic"), String::new()),
            None => (
                TargetMachine::get_host_cpu_name().to_string(),
                TargetMachine::get_host_cpu_features().to_string(),
            ),
        };
        let machine = target
            .create_target_machine(
                &triple,
                &cpu,
                &features,
                opt_level,
                RelocMode::Default,
                CodeModel::Default,
            )
            .ok_or_else(unsupported)?;

        Ok(Self {
            context,
            builder: context.create_builder(),
            module: context.create_module("kestrel.0"),
            machine,
            scope: Scope::new(),
            protos: RefCell::new(HashMap::new()),
            units: 0,
            wrappers: Cell::new(0),
        })
    }

    pub fn module(&self) -> &Module<'ctx> {
        &self.module
    }

    /// Print the IR of the current unit, for `--inspect-ir`.
    pub fn dump_module(&self) {
        self.module.print_to_stderr();
    }

    /// Remember the newest signature seen for `name`. Later declarations
    /// replace earlier ones.
    pub fn register_prototype(&self, proto: Prototype) {
        self.protos.borrow_mut().insert(proto.name.clone(), proto);
    }

    /// Resolve `name` within the current unit, falling back to a fresh
    /// declaration conjured from the prototype registry. Cross-unit calls
    /// link against these declarations at JIT or link time.
    pub fn get_function(&self, name: &str) -> Option<FunctionValue<'ctx>> {
        self.module.get_function(name).or_else(|| {
            let protos = self.protos.borrow();
            protos.get(name).map(|proto| proto.codegen(self))
        })
    }

    /// Begin a fresh unit, dropping the current one without shipping it.
    pub fn start_unit(&mut self) {
        self.units += 1;
        self.module = self.context.create_module(&format!("kestrel.{}", self.units));
    }

    /// One engine per interactive session. It is seeded with a throwaway
    /// module; the units that matter are attached as they complete.
    pub fn create_engine(&self) -> Result<ExecutionEngine<'ctx>, BackendError> {
        let seed = self.context.create_module("kestrel.jit");
        seed.create_jit_execution_engine(OptimizationLevel::None)
            .map_err(|err| BackendError::FailedToJIT(err.to_string()))
    }

    /// Hand the finished unit over to the execution engine and begin a new
    /// one. Used after a definition lands so later lines can call it.
    pub fn ship_unit(&mut self, engine: &ExecutionEngine<'ctx>) -> Result<(), BackendError> {
        engine
            .add_module(&self.module)
            .map_err(|()| BackendError::FailedToJIT("unit already attached to engine".to_owned()))?;
        self.start_unit();
        Ok(())
    }

    /// JIT the current unit, run `wrapper` (its anonymous expression), and
    /// throw the unit away. Safety: runs freshly compiled machine code,
    /// with all the trust in the source program that implies.
    pub unsafe fn jit_eval(
        &mut self,
        engine: &ExecutionEngine<'ctx>,
        wrapper: FunctionValue<'ctx>,
    ) -> Result<f64, BackendError> {
        engine
            .add_module(&self.module)
            .map_err(|()| BackendError::FailedToJIT("unit already attached to engine".to_owned()))?;

        // the engine resolves names against every unit it ever finalized,
        // so the lookup must go through the wrapper's own numbered symbol
        let symbol = wrapper.get_name().to_string_lossy();
        let lookup: Result<JitFunction<'ctx, TopLevelSignature>, _> =
            engine.get_function(&symbol);
        let value = match lookup {
            Ok(compiled) => compiled.call(),
            Err(err) => {
                let _ = engine.remove_module(&self.module);
                self.start_unit();
                return Err(BackendError::FailedToJIT(err.to_string()));
            }
        };

        let removed = engine.remove_module(&self.module);
        self.start_unit();
        removed.map_err(|err| BackendError::FailedToJIT(err.to_string()))?;
        Ok(value)
    }

    /// Run a comma-separated pass pipeline over the current unit.
    pub fn run_passes(&self, passes: &str) -> Result<(), BackendError> {
        self.module
            .run_passes(passes, &self.machine, PassBuilderOptions::create())
            .map_err(|err| BackendError::Passes {
                pipeline: passes.to_owned(),
                message: err.to_string(),
            })
    }

    /// Write the current unit to disk as an object or assembly file.
    pub fn compile(&self, path: &Path, file_type: FileType) -> Result<(), BackendError> {
        self.machine
            .write_to_file(&self.module, file_type, path)
            .map_err(|err| BackendError::EmitFailed(err.to_string()))
    }

    /// The symbol for the next anonymous wrapper. Wrapper symbols are
    /// never reused, in a unit or in an engine's symbol table.
    fn fresh_anonymous_symbol(&self) -> String {
        let n = self.wrappers.get();
        self.wrappers.set(n + 1);
        format!("{ANONYMOUS_FUNCTION_NAME}.{n}")
    }

    fn f64_type(&self) -> FloatType<'ctx> {
        self.context.f64_type()
    }

    fn current_block(&self) -> BasicBlock<'ctx> {
        self.builder
            .get_insert_block()
            .expect("builder is positioned inside a block")
    }

    fn current_function(&self) -> FunctionValue<'ctx> {
        self.current_block()
            .get_parent()
            .expect("every block belongs to a function")
    }

    /// A stack slot in the function's entry block, where mem2reg can see
    /// it. A separate builder keeps the main insert point untouched.
    fn create_entry_block_alloca(
        &self,
        function: FunctionValue<'ctx>,
        name: &str,
    ) -> Result<PointerValue<'ctx>, LowerError> {
        let entry = function
            .get_first_basic_block()
            .expect("function has an entry block");

        let slots = self.context.create_builder();
        match entry.get_first_instruction() {
            Some(first) => slots.position_before(&first),
            None => slots.position_at_end(entry),
        }

        Ok(slots.build_alloca(self.f64_type(), name)?)
    }
}

/// Recursive lowering of expression nodes. Every expression produces an
/// f64, so success is always a `FloatValue`.
pub trait LLVMCodeGen {
    fn codegen<'ctx>(&self, context: &LLVMContext<'ctx>) -> IRGenResult<'ctx>;
}

impl LLVMCodeGen for Expr {
    fn codegen<'ctx>(&self, context: &LLVMContext<'ctx>) -> IRGenResult<'ctx> {
        match &self.kind {
            ExprKind::Number(value) => Ok(context.f64_type().const_float(*value)),

            ExprKind::Variable(name) => {
                let slot = context
                    .scope
                    .get(name)
                    .ok_or_else(|| LowerError::UnknownVariable(name.clone()))?;
                let loaded = context.builder.build_load(slot, name)?;
                Ok(loaded.into_float_value())
            }

            ExprKind::Unary { op, operand } => codegen_unary(context, *op, operand),

            ExprKind::Binary { op, left, right } => codegen_binary(context, *op, left, right),

            ExprKind::Call { callee, args } => codegen_call(context, callee, args),

            ExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => codegen_if(context, cond, then_branch, else_branch),

            ExprKind::For {
                varname,
                start,
                end,
                step,
                body,
            } => codegen_for(context, varname, start, end, step.as_deref(), body),

            ExprKind::Let { bindings, body } => codegen_let(context, bindings, body),
        }
    }
}

fn float_result<'ctx>(call: CallSiteValue<'ctx>) -> FloatValue<'ctx> {
    call.try_as_basic_value()
        .left()
        .map(|value| value.into_float_value())
        .expect("calls return f64 values")
}

fn codegen_unary<'ctx>(context: &LLVMContext<'ctx>, op: char, operand: &Expr) -> IRGenResult<'ctx> {
    let value = operand.codegen(context)?;

    let overload = context
        .get_function(&format!("unary{op}"))
        .ok_or(LowerError::UnknownOperator(op))?;
    let call = context
        .builder
        .build_call(overload, &[value.into()], "unop")?;
    Ok(float_result(call))
}

fn codegen_binary<'ctx>(
    context: &LLVMContext<'ctx>,
    op: char,
    left: &Expr,
    right: &Expr,
) -> IRGenResult<'ctx> {
    if op == '=' {
        // assignment is the one operator that must not evaluate its left
        // side; it wants the variable's slot, not its value
        let ExprKind::Variable(name) = &left.kind else {
            return Err(LowerError::InvalidAssignmentTarget);
        };
        let value = right.codegen(context)?;
        let slot = context
            .scope
            .get(name)
            .ok_or_else(|| LowerError::UnknownVariable(name.clone()))?;
        context.builder.build_store(slot, value)?;
        return Ok(value);
    }

    let lhs = left.codegen(context)?;
    let rhs = right.codegen(context)?;
    let builder = &context.builder;

    match op {
        '+' => Ok(builder.build_float_add(lhs, rhs, "addtmp")?),
        '-' => Ok(builder.build_float_sub(lhs, rhs, "subtmp")?),
        '*' => Ok(builder.build_float_mul(lhs, rhs, "multmp")?),
        '/' => Ok(builder.build_float_div(lhs, rhs, "divtmp")?),

        // comparisons come back as i1 and get widened, since every value
        // in the language is an f64
        '<' => {
            let flag = builder.build_float_compare(FloatPredicate::ULT, lhs, rhs, "cmptmp")?;
            bool_to_float(context, flag)
        }
        '>' => {
            let flag = builder.build_float_compare(FloatPredicate::UGT, lhs, rhs, "cmptmp")?;
            bool_to_float(context, flag)
        }

        _ => {
            let overload = context
                .get_function(&format!("binary{op}"))
                .ok_or(LowerError::UnknownOperator(op))?;
            let call = builder.build_call(overload, &[lhs.into(), rhs.into()], "binop")?;
            Ok(float_result(call))
        }
    }
}

fn bool_to_float<'ctx>(context: &LLVMContext<'ctx>, flag: IntValue<'ctx>) -> IRGenResult<'ctx> {
    Ok(context
        .builder
        .build_unsigned_int_to_float(flag, context.f64_type(), "booltmp")?)
}

fn codegen_call<'ctx>(
    context: &LLVMContext<'ctx>,
    callee: &str,
    args: &[Expr],
) -> IRGenResult<'ctx> {
    let function = context
        .get_function(callee)
        .ok_or_else(|| LowerError::UnknownFunction(callee.to_owned()))?;

    // arity is checked before any argument lowers, so a bad call leaves
    // no stray instructions behind
    let expected = function.count_params() as usize;
    if expected != args.len() {
        return Err(LowerError::ArityMismatch {
            name: callee.to_owned(),
            expected,
            actual: args.len(),
        });
    }

    let mut lowered: Vec<BasicMetadataValueEnum> = Vec::with_capacity(args.len());
    for arg in args {
        lowered.push(arg.codegen(context)?.into());
    }

    let call = context
        .builder
        .build_call(function, &lowered, "calltmp")?;
    Ok(float_result(call))
}

fn codegen_if<'ctx>(
    context: &LLVMContext<'ctx>,
    cond: &Expr,
    then_branch: &Expr,
    else_branch: &Expr,
) -> IRGenResult<'ctx> {
    let condition = cond.codegen(context)?;
    let zero = context.f64_type().const_float(0.0);
    let condition =
        context
            .builder
            .build_float_compare(FloatPredicate::ONE, condition, zero, "ifcond")?;

    let function = context.current_function();
    let then_block = context.context.append_basic_block(function, "then");
    let else_block = context.context.append_basic_block(function, "else");
    let merge_block = context.context.append_basic_block(function, "ifcont");
    context
        .builder
        .build_conditional_branch(condition, then_block, else_block)?;

    context.builder.position_at_end(then_block);
    let then_value = then_branch.codegen(context)?;
    context.builder.build_unconditional_branch(merge_block)?;
    // nested control flow may have moved the insert point; the phi edge
    // comes from wherever the arm actually ended
    let then_end = context.current_block();

    context.builder.position_at_end(else_block);
    let else_value = else_branch.codegen(context)?;
    context.builder.build_unconditional_branch(merge_block)?;
    let else_end = context.current_block();

    context.builder.position_at_end(merge_block);
    let phi = context.builder.build_phi(context.f64_type(), "iftmp")?;
    phi.add_incoming(&[
        (&then_value as &dyn BasicValue, then_end),
        (&else_value as &dyn BasicValue, else_end),
    ]);
    Ok(phi.as_basic_value().into_float_value())
}

// Loop skeleton:
//
//   preheader:  start -> slot, br loop
//   loop:       body, slot += step, end cond, br loop | afterloop
//   afterloop:  yields 0.0
//
// The induction variable lives in a stack slot so the body may assign it,
// and the step is applied before the end condition is tested, so
// `for i = 0, i < 5 in ...` runs the body exactly five times.
fn codegen_for<'ctx>(
    context: &LLVMContext<'ctx>,
    varname: &str,
    start: &Expr,
    end: &Expr,
    step: Option<&Expr>,
    body: &Expr,
) -> IRGenResult<'ctx> {
    let function = context.current_function();
    let slot = context.create_entry_block_alloca(function, varname)?;

    // the start value is the one expression the induction variable must
    // not be visible to
    let start_value = start.codegen(context)?;
    context.builder.build_store(slot, start_value)?;

    let loop_block = context.context.append_basic_block(function, "loop");
    context.builder.build_unconditional_branch(loop_block)?;
    context.builder.position_at_end(loop_block);

    let mut frame = context.scope.frame();
    frame.bind(varname, slot);

    // the body's value is unobservable, but its effects are not
    body.codegen(context)?;

    let step_value = match step {
        Some(step) => step.codegen(context)?,
        None => context.f64_type().const_float(1.0),
    };
    let current = context.builder.build_load(slot, varname)?.into_float_value();
    let next = context
        .builder
        .build_float_add(current, step_value, "nextvar")?;
    context.builder.build_store(slot, next)?;

    let end_value = end.codegen(context)?;
    let zero = context.f64_type().const_float(0.0);
    let keep_going =
        context
            .builder
            .build_float_compare(FloatPredicate::ONE, end_value, zero, "loopcond")?;

    let after_block = context.context.append_basic_block(function, "afterloop");
    context
        .builder
        .build_conditional_branch(keep_going, loop_block, after_block)?;
    context.builder.position_at_end(after_block);
    drop(frame);

    Ok(context.f64_type().const_float(0.0))
}

fn codegen_let<'ctx>(
    context: &LLVMContext<'ctx>,
    bindings: &[(String, Option<Expr>)],
    body: &Expr,
) -> IRGenResult<'ctx> {
    let function = context.current_function();
    let mut frame = context.scope.frame();

    for (name, init) in bindings {
        // each initializer sees the names declared above it in the same
        // let, but not its own
        let value = match init {
            Some(init) => init.codegen(context)?,
            None => context.f64_type().const_float(0.0),
        };
        let slot = context.create_entry_block_alloca(function, name)?;
        context.builder.build_store(slot, value)?;
        frame.bind(name, slot);
    }

    let result = body.codegen(context)?;
    drop(frame);
    Ok(result)
}

impl Prototype {
    /// Declare the function in the current unit: external linkage, one f64
    /// per formal, f64 out. Anonymous wrappers land under a numbered
    /// symbol of their own.
    pub fn codegen<'ctx>(&self, context: &LLVMContext<'ctx>) -> FunctionValue<'ctx> {
        let f64_type = context.f64_type();
        let param_types: Vec<BasicMetadataTypeEnum> =
            vec![f64_type.into(); self.params.len()];
        let fn_type = f64_type.fn_type(&param_types, false);

        let symbol = if self.name == ANONYMOUS_FUNCTION_NAME {
            context.fresh_anonymous_symbol()
        } else {
            self.name.clone()
        };
        let function = context
            .module
            .add_function(&symbol, fn_type, Some(Linkage::External));

        // named params keep the IR legible and give the body something to
        // resolve against
        for (param, name) in function.get_param_iter().zip(&self.params) {
            param.set_name(name);
        }

        function
    }
}

impl Function {
    /// Lower a full definition into the current unit. On any failure the
    /// half-built function is erased, so a later attempt can redefine the
    /// same name cleanly.
    pub fn codegen<'ctx>(
        &self,
        context: &LLVMContext<'ctx>,
        ops: &OperatorTable,
    ) -> Result<FunctionValue<'ctx>, LowerError> {
        // wrappers are not callable, so they stay out of the registry
        if self.proto.name != ANONYMOUS_FUNCTION_NAME {
            context.register_prototype(self.proto.clone());
        }

        let function = match context.module.get_function(&self.proto.name) {
            Some(existing) => existing,
            None => self.proto.codegen(context),
        };

        if function.get_first_basic_block().is_some() {
            return Err(LowerError::MultipleFunctionDefs(self.proto.name.clone()));
        }
        if function.count_params() as usize != self.proto.params.len() {
            return Err(LowerError::PrototypeMismatch {
                name: self.proto.name.clone(),
                expected: function.count_params() as usize,
                actual: self.proto.params.len(),
            });
        }

        // a binary definition arriving from outside this parser run (a
        // stored tree, another session) still has to land in the table
        if self.proto.operator_kind == OperatorKind::Binary {
            if let Some(op) = self.proto.operator_char() {
                ops.install(op, self.proto.precedence.unwrap_or(DEFAULT_PRECEDENCE));
            }
        }

        match self.codegen_body(context, function) {
            Ok(()) => Ok(function),
            Err(err) => {
                unsafe { function.delete() };
                Err(err)
            }
        }
    }

    fn codegen_body<'ctx>(
        &self,
        context: &LLVMContext<'ctx>,
        function: FunctionValue<'ctx>,
    ) -> Result<(), LowerError> {
        let entry = context.context.append_basic_block(function, "entry");
        context.builder.position_at_end(entry);

        // parameters live in stack slots too, so bodies may assign them;
        // mem2reg turns the slots back into registers afterwards
        context.scope.clear();
        for (param, name) in function.get_param_iter().zip(&self.proto.params) {
            let slot = context.create_entry_block_alloca(function, name)?;
            context.builder.build_store(slot, param)?;
            context.scope.insert(name, slot);
        }

        let body_value = self.body.codegen(context)?;
        context.builder.build_return(Some(&body_value))?;

        if !function.verify(true) {
            return Err(BackendError::FailedToVerifyFunc(self.proto.name.clone()).into());
        }
        Ok(())
    }
}
