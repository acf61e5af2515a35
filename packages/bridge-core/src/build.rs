//! Build-argument normalization shared by every adapter's `build_raw_transaction`.

use crate::bridge::Bridge;
use crate::error::{BridgeError, Result};
use crate::types::{BridgeRole, BuildTxArgs, SwapType, TokenConfig};

/// Validate `args` against the bridge role and fill in the derived fields: `from`
/// (threshold address), and for swaps `to` (the bind), `value` (after fees) and
/// `identifier`. Returns this side's token config of the pair.
pub fn prepare_build_args<'a, B: Bridge + ?Sized>(
    bridge: &'a B,
    args: &mut BuildTxArgs,
) -> Result<&'a TokenConfig> {
    let token = bridge.base().token(&args.pair_id)?;
    let role = bridge.role();

    match (args.swap_type, role) {
        (SwapType::Swapin, BridgeRole::Source) | (SwapType::Swapout, BridgeRole::Destination) => {
            return Err(BridgeError::BuildSwapTxInWrongEndpoint);
        }
        _ => {}
    }
    if args.swap_type != SwapType::None && args.input.is_some() {
        return Err(BridgeError::InvalidArgs(
            "input data is not allowed on swap transactions".into(),
        ));
    }

    if args.from.is_empty() {
        args.from = token.dcrm_address.clone();
    }

    if args.swap_type == SwapType::None {
        if args.to.is_empty() {
            return Err(BridgeError::InvalidArgs("missing receiver".into()));
        }
        if args.value.is_none() {
            args.value = Some(args.origin_value);
        }
        return Ok(token);
    }

    if args.bind.is_empty() {
        return Err(BridgeError::InvalidArgs("missing bind address".into()));
    }
    if args.swap_id.is_empty() {
        return Err(BridgeError::InvalidArgs("missing swap id".into()));
    }
    args.to = args.bind.clone();
    let value = token.calc_swapped_value(args.origin_value);
    if value == 0 {
        return Err(BridgeError::InvalidArgs(format!(
            "swap value {} does not cover the fee",
            args.origin_value
        )));
    }
    args.value = Some(value);
    if args.identifier.is_empty() {
        args.identifier = format!("{}:{}", args.swap_type, args.pair_id.to_lowercase());
    }
    Ok(token)
}

/// `have` must cover `need`.
pub fn check_balance(need: u128, have: u128) -> Result<()> {
    if have < need {
        return Err(BridgeError::InsufficientBalance { need, have });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockChain;

    fn swap_args(swap_type: SwapType) -> BuildTxArgs {
        BuildTxArgs {
            pair_id: "USDT".into(),
            swap_id: "abc123".into(),
            swap_type,
            bind: "0x1111111111111111111111111111111111111111".into(),
            origin_value: 1_000_000,
            ..Default::default()
        }
    }

    #[test]
    fn test_swap_fills_derived_fields() {
        let (_src, dst) = MockChain::wired_pair(1);
        let mut args = swap_args(SwapType::Swapin);
        let token = prepare_build_args(dst.as_ref(), &mut args).unwrap();
        assert_eq!(args.from, token.dcrm_address);
        assert_eq!(args.to, args.bind);
        assert_eq!(args.value, Some(token.calc_swapped_value(1_000_000)));
        assert_eq!(args.identifier, "swapin:usdt");
        assert_eq!(args.unlock_memo(), "SWAPTX:abc123");
    }

    #[test]
    fn test_wrong_endpoint() {
        let (src, dst) = MockChain::wired_pair(1);
        assert!(matches!(
            prepare_build_args(src.as_ref(), &mut swap_args(SwapType::Swapin)),
            Err(BridgeError::BuildSwapTxInWrongEndpoint)
        ));
        assert!(matches!(
            prepare_build_args(dst.as_ref(), &mut swap_args(SwapType::Swapout)),
            Err(BridgeError::BuildSwapTxInWrongEndpoint)
        ));
    }

    #[test]
    fn test_input_rejected_on_swaps() {
        let (_src, dst) = MockChain::wired_pair(1);
        let mut args = swap_args(SwapType::Swapin);
        args.input = Some("deadbeef".into());
        assert!(matches!(
            prepare_build_args(dst.as_ref(), &mut args),
            Err(BridgeError::InvalidArgs(_))
        ));
    }

    #[test]
    fn test_unknown_pair() {
        let (_src, dst) = MockChain::wired_pair(1);
        let mut args = swap_args(SwapType::Swapin);
        args.pair_id = "nope".into();
        assert!(matches!(
            prepare_build_args(dst.as_ref(), &mut args),
            Err(BridgeError::UnknownPairId(_))
        ));
    }

    #[test]
    fn test_balance_check() {
        assert!(check_balance(10, 10).is_ok());
        assert!(matches!(
            check_balance(11, 10),
            Err(BridgeError::InsufficientBalance { need: 11, have: 10 })
        ));
    }
}
