//! Diagnostic message templates.
//!
//! Errors carry a [`MessageKey`] and positional arguments instead of text.
//! The template table is built once and only read afterwards.

use hashbrown::HashMap;
use lazy_static::lazy_static;

/// Identifies a diagnostic message template.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageKey {
    /// `{0}` operator, `{1}` left type, `{2}` right type.
    OperationNotDefinedForTypes,
    /// `{0}` operator, `{1}` operand type.
    OperationNotDefinedForType,
    /// `{0}` source type, `{1}` target type.
    CannotConvertType,
    /// `{0}` source type, `{1}` target type.
    NoExplicitConversion,
    UndefinedName,
    UndefinedFunction,
    /// `{0}` function, `{1}` expected, `{2}` given.
    ArgumentCountMismatch,
    NotAnArray,
    IndexNotInteger,
    /// `{0}` condition type.
    ConditionNotBoolean,
    /// `{0}` then type, `{1}` else type.
    BranchTypeMismatch,
    /// `{0}` operand type, `{1}` item type.
    MembershipTypeMismatch,
    /// `{0}` first element type, `{1}` other element type.
    ArrayElementMismatch,
    EmptyArrayLiteral,
    ShiftCountNotInteger,
    LiteralOutOfRange,
}

lazy_static! {
    static ref TEMPLATES: HashMap<MessageKey, &'static str> = {
        use MessageKey::*;
        let mut table = HashMap::new();
        table.insert(OperationNotDefinedForTypes, "operation '{0}' is not defined for types '{1}' and '{2}'");
        table.insert(OperationNotDefinedForType, "operation '{0}' is not defined for type '{1}'");
        table.insert(CannotConvertType, "cannot implicitly convert from '{0}' to '{1}'");
        table.insert(NoExplicitConversion, "no conversion exists from '{0}' to '{1}'");
        table.insert(UndefinedName, "name '{0}' is not defined");
        table.insert(UndefinedFunction, "function '{0}' is not defined");
        table.insert(ArgumentCountMismatch, "function '{0}' takes {1} argument(s) but {2} were given");
        table.insert(NotAnArray, "cannot index a value of type '{0}'");
        table.insert(IndexNotInteger, "array index must be an integer, found '{0}'");
        table.insert(ConditionNotBoolean, "condition must be 'Boolean', found '{0}'");
        table.insert(BranchTypeMismatch, "conditional branches have incompatible types '{0}' and '{1}'");
        table.insert(MembershipTypeMismatch, "cannot test '{0}' for membership among '{1}' items");
        table.insert(ArrayElementMismatch, "array elements have incompatible types '{0}' and '{1}'");
        table.insert(EmptyArrayLiteral, "cannot infer the element type of an empty array");
        table.insert(ShiftCountNotInteger, "shift count must be an integer, found '{0}'");
        table.insert(LiteralOutOfRange, "literal '{0}' is out of range");
        table
    };
}

impl MessageKey {
    /// Stable diagnostic code shown next to rendered errors.
    pub fn code(self) -> &'static str {
        use MessageKey::*;
        match self {
            OperationNotDefinedForTypes => "E001",
            OperationNotDefinedForType => "E002",
            CannotConvertType => "E003",
            NoExplicitConversion => "E004",
            UndefinedName => "E005",
            UndefinedFunction => "E006",
            ArgumentCountMismatch => "E007",
            NotAnArray => "E008",
            IndexNotInteger => "E009",
            ConditionNotBoolean => "E010",
            BranchTypeMismatch => "E011",
            MembershipTypeMismatch => "E012",
            ArrayElementMismatch => "E013",
            EmptyArrayLiteral => "E014",
            ShiftCountNotInteger => "E015",
            LiteralOutOfRange => "E016",
        }
    }
}

/// Template text for `key`.
pub fn template(key: MessageKey) -> &'static str {
    TEMPLATES.get(&key).copied().unwrap_or("unknown error")
}

/// Format the template for `key`, replacing `{n}` with `args[n]`.
///
/// Placeholders without a matching argument are kept verbatim.
pub fn format_message(key: MessageKey, args: &[&str]) -> String {
    let template = template(key);
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let argument = after.find('}').and_then(|close| {
            let index: usize = after[..close].parse().ok()?;
            Some((args.get(index)?, close))
        });
        match argument {
            Some((value, close)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}
