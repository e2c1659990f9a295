use crate::executor::{decode_u64, encode_u64, ExecutionContext, ExecutionError, PrivateContract};

const OWNER_KEY: &[u8] = b"owner";
const VALUE_KEY: &[u8] = b"value";
const NO_INPUTS: &[&str] = &[];
const PUBLIC_Y: &[&str] = &["y"];

/// Private counterpart of a public storage contract.
///
/// `store(x)` keeps `x` privately. `store_with_public_data(x)` also keeps `x`
/// privately and pushes `x + y`, with `y` the caller-supplied public input, to
/// the public contract as an outbound call. `retrieve` returns the private
/// value. The first caller to store owns the slot.
pub struct StorageContract {
    public_target: Vec<u8>,
}

impl StorageContract {
    pub fn new(public_target: impl Into<Vec<u8>>) -> Self {
        Self {
            public_target: public_target.into(),
        }
    }

    fn check_owner(ctx: &mut ExecutionContext<'_>) -> Result<(), ExecutionError> {
        let caller = ctx.caller().to_vec();
        match ctx.get(OWNER_KEY) {
            Some(owner) if owner != caller => {
                Err(ExecutionError::Reverted("caller is not the owner".into()))
            }
            Some(_) => Ok(()),
            None => {
                ctx.set(OWNER_KEY, caller);
                Ok(())
            }
        }
    }
}

pub fn store_call_payload(value: u64) -> Vec<u8> {
    let mut payload = b"store".to_vec();
    payload.extend(encode_u64(value));
    payload
}

impl PrivateContract for StorageContract {
    fn required_public_inputs(&self, method: &str) -> Option<&'static [&'static str]> {
        match method {
            "store" | "retrieve" => Some(NO_INPUTS),
            "store_with_public_data" => Some(PUBLIC_Y),
            _ => None,
        }
    }

    fn call(&self, ctx: &mut ExecutionContext<'_>) -> Result<(), ExecutionError> {
        match ctx.method() {
            "store" => {
                let x = ctx.arg_u64("x")?;
                Self::check_owner(ctx)?;
                ctx.set(VALUE_KEY, encode_u64(x));
                Ok(())
            }
            "store_with_public_data" => {
                let x = ctx.arg_u64("x")?;
                let y = ctx.public_u64("y")?;
                let combined = x
                    .checked_add(y)
                    .ok_or_else(|| ExecutionError::Reverted("overflow".into()))?;
                Self::check_owner(ctx)?;
                ctx.set(VALUE_KEY, encode_u64(x));
                ctx.emit_external_call(self.public_target.clone(), store_call_payload(combined));
                Ok(())
            }
            "retrieve" => {
                let value = match ctx.get(VALUE_KEY) {
                    Some(value) => decode_u64(&value)
                        .ok_or_else(|| ExecutionError::Reverted("corrupt value".into()))?,
                    None => 0,
                };
                ctx.set_return(encode_u64(value));
                Ok(())
            }
            other => Err(ExecutionError::UnknownMethod {
                contract: "storage".into(),
                method: other.into(),
            }),
        }
    }
}
