//! Minimal ABI codec for the factory, pair, token and router calls.
//!
//! Only the argument shapes these contracts use are supported: `address`,
//! `uint256` and a single dynamic `address[]`.

use crate::node::{CallOutput, ContractWrite, NodeError, OutputKind, ReadCall};
use cpamm_domain::Address;
use primitive_types::U256;
use sha3::{Digest, Keccak256};

const WORD: usize = 32;

/// Selector of `Error(string)`, the standard revert payload.
const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];

/// First four bytes of the Keccak-256 hash of a canonical signature.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = Keccak256::digest(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// ABI argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Address(Address),
    Uint(U256),
    AddressArray(Vec<Address>),
}

fn uint_word(value: U256) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    for (i, byte) in word.iter_mut().rev().enumerate() {
        *byte = value.byte(i);
    }
    word
}

fn address_word(address: &Address) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[12..].copy_from_slice(address.as_bytes());
    word
}

/// Encodes `signature` and its arguments into call data.
pub fn encode_call(signature: &str, tokens: &[Token]) -> Vec<u8> {
    let head_len = tokens.len() * WORD;
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();

    for token in tokens {
        match token {
            Token::Address(a) => head.extend_from_slice(&address_word(a)),
            Token::Uint(v) => head.extend_from_slice(&uint_word(*v)),
            Token::AddressArray(items) => {
                head.extend_from_slice(&uint_word(U256::from(head_len + tail.len())));
                tail.extend_from_slice(&uint_word(U256::from(items.len())));
                for item in items {
                    tail.extend_from_slice(&address_word(item));
                }
            }
        }
    }

    let mut data = Vec::with_capacity(4 + head.len() + tail.len());
    data.extend_from_slice(&selector(signature));
    data.extend_from_slice(&head);
    data.extend_from_slice(&tail);
    data
}

/// Target contract and call data of a read, or `None` for native balance reads
/// which are not contract calls.
pub fn encode_read(call: &ReadCall) -> Option<(Address, Vec<u8>)> {
    use Token::{Address as A, AddressArray as Path, Uint as U};

    let encoded = match call {
        ReadCall::PoolCount { factory } => (*factory, encode_call("allPairsLength()", &[])),
        ReadCall::PoolAt { factory, index } => (
            *factory,
            encode_call("allPairs(uint256)", &[U(U256::from(*index))]),
        ),
        ReadCall::PairFor {
            factory,
            token_a,
            token_b,
        } => (
            *factory,
            encode_call("getPair(address,address)", &[A(*token_a), A(*token_b)]),
        ),
        ReadCall::Token0 { pair } => (*pair, encode_call("token0()", &[])),
        ReadCall::Token1 { pair } => (*pair, encode_call("token1()", &[])),
        ReadCall::Reserves { pair } => (*pair, encode_call("getReserves()", &[])),
        ReadCall::TotalSupply { token } => (*token, encode_call("totalSupply()", &[])),
        ReadCall::BalanceOf { token, owner } => {
            (*token, encode_call("balanceOf(address)", &[A(*owner)]))
        }
        ReadCall::Allowance {
            token,
            owner,
            spender,
        } => (
            *token,
            encode_call("allowance(address,address)", &[A(*owner), A(*spender)]),
        ),
        ReadCall::Decimals { token } => (*token, encode_call("decimals()", &[])),
        ReadCall::Symbol { token } => (*token, encode_call("symbol()", &[])),
        ReadCall::Name { token } => (*token, encode_call("name()", &[])),
        ReadCall::AmountsOut {
            router,
            amount_in,
            path,
        } => (
            *router,
            encode_call(
                "getAmountsOut(uint256,address[])",
                &[U(*amount_in), Path(path.clone())],
            ),
        ),
        ReadCall::AmountsIn {
            router,
            amount_out,
            path,
        } => (
            *router,
            encode_call(
                "getAmountsIn(uint256,address[])",
                &[U(*amount_out), Path(path.clone())],
            ),
        ),
        ReadCall::NativeBalance { .. } => return None,
    };
    Some(encoded)
}

/// Call data for a state-changing call.
pub fn encode_write(call: &ContractWrite) -> Vec<u8> {
    use Token::{Address as A, AddressArray as Path, Uint as U};

    match call {
        ContractWrite::Approve { spender, amount } => {
            encode_call("approve(address,uint256)", &[A(*spender), U(*amount)])
        }
        ContractWrite::SwapExactTokensForTokens {
            amount_in,
            amount_out_min,
            path,
            to,
            deadline,
        } => encode_call(
            "swapExactTokensForTokens(uint256,uint256,address[],address,uint256)",
            &[
                U(*amount_in),
                U(*amount_out_min),
                Path(path.clone()),
                A(*to),
                U(*deadline),
            ],
        ),
        ContractWrite::SwapExactEthForTokens {
            amount_out_min,
            path,
            to,
            deadline,
        } => encode_call(
            "swapExactETHForTokens(uint256,address[],address,uint256)",
            &[U(*amount_out_min), Path(path.clone()), A(*to), U(*deadline)],
        ),
        ContractWrite::SwapExactTokensForEth {
            amount_in,
            amount_out_min,
            path,
            to,
            deadline,
        } => encode_call(
            "swapExactTokensForETH(uint256,uint256,address[],address,uint256)",
            &[
                U(*amount_in),
                U(*amount_out_min),
                Path(path.clone()),
                A(*to),
                U(*deadline),
            ],
        ),
        ContractWrite::AddLiquidity {
            token_a,
            token_b,
            amount_a_desired,
            amount_b_desired,
            amount_a_min,
            amount_b_min,
            to,
            deadline,
        } => encode_call(
            "addLiquidity(address,address,uint256,uint256,uint256,uint256,address,uint256)",
            &[
                A(*token_a),
                A(*token_b),
                U(*amount_a_desired),
                U(*amount_b_desired),
                U(*amount_a_min),
                U(*amount_b_min),
                A(*to),
                U(*deadline),
            ],
        ),
        ContractWrite::AddLiquidityEth {
            token,
            amount_token_desired,
            amount_token_min,
            amount_eth_min,
            to,
            deadline,
        } => encode_call(
            "addLiquidityETH(address,uint256,uint256,uint256,address,uint256)",
            &[
                A(*token),
                U(*amount_token_desired),
                U(*amount_token_min),
                U(*amount_eth_min),
                A(*to),
                U(*deadline),
            ],
        ),
        ContractWrite::RemoveLiquidity {
            token_a,
            token_b,
            liquidity,
            amount_a_min,
            amount_b_min,
            to,
            deadline,
        } => encode_call(
            "removeLiquidity(address,address,uint256,uint256,uint256,address,uint256)",
            &[
                A(*token_a),
                A(*token_b),
                U(*liquidity),
                U(*amount_a_min),
                U(*amount_b_min),
                A(*to),
                U(*deadline),
            ],
        ),
        ContractWrite::RemoveLiquidityEth {
            token,
            liquidity,
            amount_token_min,
            amount_eth_min,
            to,
            deadline,
        } => encode_call(
            "removeLiquidityETH(address,uint256,uint256,uint256,address,uint256)",
            &[
                A(*token),
                U(*liquidity),
                U(*amount_token_min),
                U(*amount_eth_min),
                A(*to),
                U(*deadline),
            ],
        ),
    }
}

fn word_at(data: &[u8], index: usize) -> Result<&[u8], NodeError> {
    let start = index * WORD;
    data.get(start..start + WORD)
        .ok_or_else(|| NodeError::Decode(format!("return data too short for word {index}")))
}

fn uint_at(data: &[u8], index: usize) -> Result<U256, NodeError> {
    word_at(data, index).map(U256::from_big_endian)
}

fn offset_at(data: &[u8], index: usize) -> Result<usize, NodeError> {
    let raw = uint_at(data, index)?;
    if raw > U256::from(data.len()) {
        return Err(NodeError::Decode(format!("offset {raw} out of bounds")));
    }
    Ok(raw.as_usize())
}

pub fn decode_uint(data: &[u8]) -> Result<U256, NodeError> {
    uint_at(data, 0)
}

pub fn decode_address(data: &[u8]) -> Result<Address, NodeError> {
    word_at(data, 0).map(|w| Address::from_slice(&w[12..]))
}

pub fn decode_uint_array(data: &[u8]) -> Result<Vec<U256>, NodeError> {
    let offset = offset_at(data, 0)?;
    let body = &data[offset..];
    let len = uint_at(body, 0)?;
    if len > U256::from(body.len() / WORD) {
        return Err(NodeError::Decode(format!("array length {len} out of bounds")));
    }
    (1..=len.as_usize()).map(|i| uint_at(body, i)).collect()
}

/// Decodes a `string` return value. Tokens that return `bytes32` instead are
/// accepted and trimmed of trailing zero bytes.
pub fn decode_string(data: &[u8]) -> Result<String, NodeError> {
    if data.len() == WORD {
        let end = data.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
        return String::from_utf8(data[..end].to_vec())
            .map_err(|e| NodeError::Decode(e.to_string()));
    }
    let offset = offset_at(data, 0)?;
    let body = &data[offset..];
    let len = uint_at(body, 0)?;
    if len > U256::from(body.len().saturating_sub(WORD)) {
        return Err(NodeError::Decode(format!("string length {len} out of bounds")));
    }
    let bytes = &body[WORD..WORD + len.as_usize()];
    String::from_utf8(bytes.to_vec()).map_err(|e| NodeError::Decode(e.to_string()))
}

/// Decodes an `Error(string)` revert payload.
pub fn decode_revert(data: &[u8]) -> Option<String> {
    match data.split_first_chunk::<4>() {
        Some((sel, rest)) if *sel == ERROR_STRING_SELECTOR => decode_string(rest).ok(),
        _ => None,
    }
}

/// Decodes raw return data according to the shape expected by `kind`.
pub fn decode_output(kind: OutputKind, data: &[u8]) -> Result<CallOutput, NodeError> {
    if data.is_empty() {
        return Err(NodeError::Decode("empty return data".to_string()));
    }
    Ok(match kind {
        OutputKind::Uint => CallOutput::Uint(decode_uint(data)?),
        OutputKind::Address => CallOutput::Address(decode_address(data)?),
        OutputKind::Text => CallOutput::Text(decode_string(data)?),
        OutputKind::Reserves => CallOutput::Reserves {
            reserve0: uint_at(data, 0)?,
            reserve1: uint_at(data, 1)?,
        },
        OutputKind::Amounts => CallOutput::Amounts(decode_uint_array(data)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use primitive_types::H160;

    fn word(v: u64) -> Vec<u8> {
        uint_word(U256::from(v)).to_vec()
    }

    #[test]
    fn test_known_selectors() {
        assert_eq!(selector("balanceOf(address)"), [0x70, 0xa0, 0x82, 0x31]);
        assert_eq!(selector("approve(address,uint256)"), [0x09, 0x5e, 0xa7, 0xb3]);
        assert_eq!(selector("getReserves()"), [0x09, 0x02, 0xf1, 0xac]);
        assert_eq!(selector("Error(string)"), ERROR_STRING_SELECTOR);
    }

    #[test]
    fn test_encode_static_arguments() {
        let owner = H160::repeat_byte(0xab);
        let (to, data) = encode_read(&ReadCall::BalanceOf {
            token: H160::repeat_byte(1),
            owner,
        })
        .unwrap();
        assert_eq!(to, H160::repeat_byte(1));
        assert_eq!(data.len(), 4 + 32);
        assert_eq!(&data[4..16], &[0u8; 12]);
        assert_eq!(&data[16..], owner.as_bytes());
    }

    #[test]
    fn test_encode_dynamic_path() {
        let path = vec![H160::repeat_byte(1), H160::repeat_byte(2)];
        let data = encode_call(
            "getAmountsOut(uint256,address[])",
            &[Token::Uint(U256::from(500u64)), Token::AddressArray(path)],
        );
        let body = &data[4..];
        assert_eq!(body.len(), 32 * 5);
        assert_eq!(&body[..32], word(500).as_slice());
        assert_eq!(&body[32..64], word(64).as_slice());
        assert_eq!(&body[64..96], word(2).as_slice());
        assert_eq!(&body[96 + 12..128], H160::repeat_byte(1).as_bytes());
        assert_eq!(&body[128 + 12..160], H160::repeat_byte(2).as_bytes());
    }

    #[test]
    fn test_dynamic_offset_follows_all_heads() {
        let data = encode_write(&ContractWrite::SwapExactTokensForTokens {
            amount_in: U256::one(),
            amount_out_min: U256::one(),
            path: vec![H160::repeat_byte(1), H160::repeat_byte(2)],
            to: H160::repeat_byte(3),
            deadline: U256::from(99u64),
        });
        let body = &data[4..];
        // five head words, then the array
        assert_eq!(&body[64..96], word(160).as_slice());
        assert_eq!(&body[160..192], word(2).as_slice());
    }

    #[test]
    fn test_decode_amounts() {
        let mut data = word(32);
        data.extend(word(3));
        data.extend(word(100));
        data.extend(word(90));
        data.extend(word(80));
        let out = decode_output(OutputKind::Amounts, &data).unwrap();
        assert_eq!(
            out,
            CallOutput::Amounts(vec![U256::from(100u64), U256::from(90u64), U256::from(80u64)])
        );
    }

    #[test]
    fn test_decode_strings() {
        let mut data = word(32);
        data.extend(word(4));
        let mut text = b"USDC".to_vec();
        text.resize(32, 0);
        data.extend(text.clone());
        assert_eq!(decode_string(&data).unwrap(), "USDC");

        // bytes32 symbol
        let mut raw = b"MKR".to_vec();
        raw.resize(32, 0);
        assert_eq!(decode_string(&raw).unwrap(), "MKR");
    }

    #[test]
    fn test_decode_revert_reason() {
        let reason = "UniswapV2Router: EXPIRED";
        let mut data = ERROR_STRING_SELECTOR.to_vec();
        data.extend(word(32));
        data.extend(word(reason.len() as u64));
        let mut text = reason.as_bytes().to_vec();
        text.resize(32, 0);
        data.extend(text);
        assert_eq!(decode_revert(&data).as_deref(), Some(reason));
        assert_eq!(decode_revert(&[1, 2, 3, 4]), None);
    }

    #[test]
    fn test_empty_and_truncated_data() {
        assert!(decode_output(OutputKind::Uint, &[]).is_err());
        assert!(decode_output(OutputKind::Reserves, &word(1)).is_err());
        let mut bad = word(32);
        bad.extend(word(1_000));
        assert!(decode_uint_array(&bad).is_err());
    }
}
