/// Shim target that maps to the in-harness reporting proxy instead of a real module.
pub const PROXY_SHIM_TARGET: &str = "@bridge";

const HARNESS_TEMPLATE: &str = r#"import sys
import types
import importlib
import traceback

try:
    import clr
    try:
        clr.AddReference(__ASSEMBLY__)
    except Exception:
        pass
except ImportError:
    clr = None


class _NullBridge(object):
    Config = None

    @staticmethod
    def SendMessage(m):
        print("[Fallback] Success: %s" % (m,))

    @staticmethod
    def SendError(m):
        print("[Fallback] Error: %s" % (m,))


def _resolve_bridge():
    for _module_name, _attr in __BRIDGE_CANDIDATES__:
        try:
            _found = getattr(importlib.import_module(_module_name), _attr, None)
        except Exception:
            _found = None
        if _found is not None:
            return _found
    return _NullBridge


_RealBridge = _resolve_bridge()
_report_state = {"sent": False}


def _report_once(send, message):
    if _report_state["sent"]:
        return
    _report_state["sent"] = True
    try:
        send(str(message))
    except Exception:
        print("[Internal] Report failed: %s" % traceback.format_exc())


class _BridgeProxy(object):
    @staticmethod
    def SendSuccess(m):
        _report_once(_RealBridge.SendMessage, m)

    @staticmethod
    def SendMessage(m):
        _BridgeProxy.SendSuccess(m)

    @staticmethod
    def SendResult(m):
        _BridgeProxy.SendSuccess(m)

    @staticmethod
    def SendError(m):
        _report_once(_RealBridge.SendError, m)

    @staticmethod
    def get_Config():
        return getattr(_RealBridge, "Config", None)


_proxy_module = types.ModuleType("AiSkillsBridge")
for _fn in ("SendSuccess", "SendMessage", "SendResult", "SendError"):
    setattr(_proxy_module, _fn, getattr(_BridgeProxy, _fn))


def _shim_target(target):
    if target == __PROXY_TARGET__:
        return _proxy_module
    try:
        return importlib.import_module(target)
    except Exception:
        return None


for _alias, _target in __SHIMS__:
    if _alias not in sys.modules:
        _shim = _shim_target(_target)
        if _shim is not None:
            sys.modules[_alias] = _shim

try:
    import UnityEngine
    import UnityEditor
except Exception:
    pass

AiSkillsBridge = _BridgeProxy

print("[Internal] Running user code...")
try:
__USER_CODE__
    pass
except Exception as e:
    _err = traceback.format_exc()
    print("[Internal] Execution Error: %s" % _err)
    _BridgeProxy.SendError("Error: %s\n%s" % (e, _err))
finally:
    if not _report_state["sent"]:
        _BridgeProxy.SendSuccess("Done.")
"#;

fn python_str(value: &str) -> String {
    // A JSON string literal is also a valid Python string literal.
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

fn python_pairs(pairs: &[(String, String)]) -> String {
    let items = pairs
        .iter()
        .map(|(left, right)| format!("({}, {})", python_str(left), python_str(right)))
        .collect::<Vec<_>>();
    format!("[{}]", items.join(", "))
}

/// Indents every non-blank line by one block level, leaving blank lines empty.
fn indent_block(code: &str) -> String {
    code.replace("\r\n", "\n")
        .lines()
        .map(|line| {
            if line.trim().is_empty() {
                String::new()
            } else {
                format!("    {line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Python wrapper run by the editor's embedded interpreter. It resolves the reporting
/// bridge from `bridge_candidates` (falling back to a printing stand-in), registers
/// `shims`, and lets exactly one terminal report leave the editor per execution.
#[derive(Debug, Clone)]
pub struct Harness {
    /// Optional assembly holding the editor-side bridge.
    pub assembly: String,
    /// `(module, attribute)` import paths tried in order to find the real bridge.
    pub bridge_candidates: Vec<(String, String)>,
    /// `(alias, target)` modules registered when `alias` is not already importable.
    pub shims: Vec<(String, String)>,
}

impl Default for Harness {
    fn default() -> Self {
        Harness {
            assembly: "Observater.AiSkills".to_string(),
            bridge_candidates: vec![
                (
                    "Observater.AiSkills.Runtime.Core".to_string(),
                    "AiSkillsBridge".to_string(),
                ),
                ("Observater.AiSkills".to_string(), "AiSkillsBridge".to_string()),
            ],
            shims: vec![
                ("AiSkillsBridge".to_string(), PROXY_SHIM_TARGET.to_string()),
                ("unity_editor".to_string(), "UnityEditor".to_string()),
                ("unity_engine".to_string(), "UnityEngine".to_string()),
            ],
        }
    }
}

impl Harness {
    pub fn wrap(&self, code: &str) -> String {
        HARNESS_TEMPLATE
            .replace("__ASSEMBLY__", &python_str(&self.assembly))
            .replace("__BRIDGE_CANDIDATES__", &python_pairs(&self.bridge_candidates))
            .replace("__PROXY_TARGET__", &python_str(PROXY_SHIM_TARGET))
            .replace("__SHIMS__", &python_pairs(&self.shims))
            .replace("__USER_CODE__", &indent_block(code))
    }
}
