//! Chain client seam.
//!
//! The orchestrator only needs three capabilities: deploy bytecode, call a
//! method on a deployed contract, and resolve a confirmed deployment into an
//! address plus ABI. [`JsonRpcChainClient`] provides them over plain
//! Ethereum JSON-RPC with node-managed (unlocked) accounts.

use std::{future::Future, time::Duration};

use alloy_core::{
    dyn_abi::{DynSolValue, JsonAbiExt},
    json_abi::Function,
    primitives::{Address, B256, Bytes},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    ChainError,
    rpc::{self, deserialize_opt_u64_from_hex},
};

/// Transaction options shared by every step unless overridden.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOptions {
    pub gas_limit: u64,
    pub from: Address,
}

/// A confirmed, successful transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub transaction_hash: B256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_used: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<Address>,
}

/// The result of a confirmed deploy transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub address: Address,
    pub receipt: Receipt,
}

/// A confirmed deployment paired with the ABI of the artifact it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct DeployHandle {
    pub contract_name: String,
    pub abi: Value,
    pub deployment: Deployment,
}

/// The final address and ABI of a deployed contract.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedContract {
    pub address: Address,
    pub abi: Value,
}

/// Submits transactions and waits for their confirmation.
///
/// Each method resolves once the transaction is confirmed or has definitively
/// failed. Timeout policy belongs to the implementation.
pub trait ChainClient: Send + Sync {
    /// Deploy `bytecode` with ABI-encoded constructor arguments appended.
    fn deploy(
        &self,
        bytecode: &Bytes,
        constructor_args: &[DynSolValue],
        options: TxOptions,
    ) -> impl Future<Output = Result<Deployment, ChainError>> + Send;

    /// Call `method` (canonical signature, e.g. `setAuthority(address)`) on
    /// the contract at `address`.
    fn call(
        &self,
        address: Address,
        method: &str,
        args: &[DynSolValue],
        options: TxOptions,
    ) -> impl Future<Output = Result<Receipt, ChainError>> + Send;

    /// Resolve a confirmed deployment into its final address and ABI.
    fn resolve_deployed(
        &self,
        handle: &DeployHandle,
    ) -> impl Future<Output = Result<ResolvedContract, ChainError>> + Send;
}

/// Append ABI-encoded constructor arguments to the deploy bytecode.
pub fn deploy_data(bytecode: &Bytes, constructor_args: &[DynSolValue]) -> Bytes {
    let mut data = bytecode.to_vec();
    if !constructor_args.is_empty() {
        data.extend(DynSolValue::Tuple(constructor_args.to_vec()).abi_encode_params());
    }
    data.into()
}

/// Selector followed by the ABI-encoded arguments.
pub fn call_data(method: &str, args: &[DynSolValue]) -> Result<Bytes, ChainError> {
    let function = Function::parse(method)
        .map_err(|e| ChainError::Encoding(format!("invalid method signature `{method}`: {e}")))?;
    function
        .abi_encode_input(args)
        .map(Bytes::from)
        .map_err(|e| ChainError::Encoding(format!("{method}: {e}")))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: B256,
    #[serde(default, deserialize_with = "deserialize_opt_u64_from_hex")]
    block_number: Option<u64>,
    #[serde(default, deserialize_with = "deserialize_opt_u64_from_hex")]
    gas_used: Option<u64>,
    #[serde(default, deserialize_with = "deserialize_opt_u64_from_hex")]
    status: Option<u64>,
    #[serde(default)]
    contract_address: Option<Address>,
}

impl RpcReceipt {
    /// Pre-byzantium receipts carry no status; treat them as successful.
    fn into_receipt(self) -> Result<Receipt, ChainError> {
        if self.status == Some(0) {
            return Err(ChainError::Reverted {
                tx_hash: self.transaction_hash,
            });
        }

        Ok(Receipt {
            transaction_hash: self.transaction_hash,
            block_number: self.block_number,
            gas_used: self.gas_used,
            contract_address: self.contract_address,
        })
    }
}

/// Default maximum time to wait for a transaction receipt.
pub const DEFAULT_RECEIPT_TIMEOUT: Duration = Duration::from_secs(120);

/// Default interval between receipt polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// A [`ChainClient`] speaking Ethereum JSON-RPC.
///
/// Transactions are sent with `eth_sendTransaction`, so the sender must be an
/// account the node manages (a dev chain's pre-funded accounts, for
/// instance). Confirmation is detected by polling `eth_getTransactionReceipt`.
#[derive(Debug, Clone)]
pub struct JsonRpcChainClient {
    client: reqwest::Client,
    url: String,
    receipt_timeout: Duration,
    poll_interval: Duration,
}

impl JsonRpcChainClient {
    pub fn new(url: &url::Url) -> Result<Self, ChainError> {
        Ok(Self {
            client: rpc::create_client(rpc::DEFAULT_REQUEST_TIMEOUT)?,
            url: url.to_string(),
            receipt_timeout: DEFAULT_RECEIPT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    pub fn with_receipt_timeout(mut self, timeout: Duration) -> Self {
        self.receipt_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// The accounts managed by the node.
    pub async fn accounts(&self) -> Result<Vec<Address>, ChainError> {
        rpc::json_rpc_call(&self.client, &self.url, "eth_accounts", vec![]).await
    }

    /// The deployed code at `address`.
    pub async fn code_at(&self, address: Address) -> Result<Bytes, ChainError> {
        rpc::json_rpc_call(
            &self.client,
            &self.url,
            "eth_getCode",
            vec![serde_json::json!(address), serde_json::json!("latest")],
        )
        .await
    }

    async fn send_transaction(
        &self,
        to: Option<Address>,
        data: &Bytes,
        options: TxOptions,
    ) -> Result<B256, ChainError> {
        let mut tx = serde_json::json!({
            "from": options.from,
            "gas": format!("{:#x}", options.gas_limit),
            "data": format!("0x{}", hex::encode(data)),
        });
        if let Some(to) = to {
            tx["to"] = serde_json::json!(to);
        }

        let tx_hash: B256 =
            rpc::json_rpc_call(&self.client, &self.url, "eth_sendTransaction", vec![tx]).await?;

        tracing::debug!(
            tx_hash = %tx_hash,
            from = %options.from,
            gas_limit = options.gas_limit,
            "Transaction submitted"
        );

        Ok(tx_hash)
    }

    async fn wait_for_receipt(&self, tx_hash: B256) -> Result<Receipt, ChainError> {
        let client = &self.client;
        let url = self.url.as_str();

        let polled = rpc::poll_until(self.receipt_timeout, self.poll_interval, move || async move {
            rpc::json_rpc_call::<Option<RpcReceipt>>(
                client,
                url,
                "eth_getTransactionReceipt",
                vec![serde_json::json!(tx_hash)],
            )
            .await
        })
        .await?;

        settle_receipt(polled, tx_hash, self.receipt_timeout)
    }
}

/// Turn the outcome of receipt polling into a confirmed receipt. Nothing
/// polled within `waited` is a timeout.
fn settle_receipt(
    polled: Option<RpcReceipt>,
    tx_hash: B256,
    waited: Duration,
) -> Result<Receipt, ChainError> {
    polled
        .ok_or(ChainError::Timeout { tx_hash, waited })?
        .into_receipt()
}

impl ChainClient for JsonRpcChainClient {
    async fn deploy(
        &self,
        bytecode: &Bytes,
        constructor_args: &[DynSolValue],
        options: TxOptions,
    ) -> Result<Deployment, ChainError> {
        let data = deploy_data(bytecode, constructor_args);
        let tx_hash = self.send_transaction(None, &data, options).await?;
        let receipt = self.wait_for_receipt(tx_hash).await?;

        let address = receipt
            .contract_address
            .ok_or(ChainError::MissingContractAddress { tx_hash })?;

        Ok(Deployment { address, receipt })
    }

    async fn call(
        &self,
        address: Address,
        method: &str,
        args: &[DynSolValue],
        options: TxOptions,
    ) -> Result<Receipt, ChainError> {
        let data = call_data(method, args)?;
        let tx_hash = self.send_transaction(Some(address), &data, options).await?;
        self.wait_for_receipt(tx_hash).await
    }

    async fn resolve_deployed(&self, handle: &DeployHandle) -> Result<ResolvedContract, ChainError> {
        let address = handle.deployment.address;
        let code = self.code_at(address).await?;
        if code.is_empty() {
            return Err(ChainError::NoCode { address });
        }

        Ok(ResolvedContract {
            address,
            abi: handle.abi.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use alloy_core::primitives::{U256, address, keccak256};
    use serde_json::json;

    use super::*;

    #[test]
    fn test_receipt_parsing() {
        let raw = json!({
            "transactionHash": "0x1111111111111111111111111111111111111111111111111111111111111111",
            "blockNumber": "0x1b4",
            "gasUsed": "0x5208",
            "status": "0x1",
            "contractAddress": "0x5fbdb2315678afecb367f032d93f642f64180aa3",
            "logs": []
        });

        let receipt = serde_json::from_value::<RpcReceipt>(raw)
            .unwrap()
            .into_receipt()
            .unwrap();

        assert_eq!(receipt.block_number, Some(436));
        assert_eq!(receipt.gas_used, Some(21000));
        assert_eq!(
            receipt.contract_address,
            Some(address!("0x5FbDB2315678afecb367f032d93F642f64180aa3"))
        );
    }

    #[test]
    fn test_reverted_receipt() {
        let raw = json!({
            "transactionHash": "0x2222222222222222222222222222222222222222222222222222222222222222",
            "status": "0x0",
            "contractAddress": null
        });

        let err = serde_json::from_value::<RpcReceipt>(raw)
            .unwrap()
            .into_receipt()
            .unwrap_err();
        assert!(matches!(err, ChainError::Reverted { .. }));
    }

    #[test]
    fn test_unconfirmed_receipt_times_out() {
        let tx_hash = B256::repeat_byte(0x33);

        let err = settle_receipt(None, tx_hash, Duration::from_secs(120)).unwrap_err();

        match &err {
            ChainError::Timeout { tx_hash: hash, waited } => {
                assert_eq!(*hash, tx_hash);
                assert_eq!(*waited, Duration::from_secs(120));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains("timed out after 120s"));
    }

    #[test]
    fn test_polled_receipt_is_settled() {
        let tx_hash = B256::repeat_byte(0x44);
        let polled = RpcReceipt {
            transaction_hash: tx_hash,
            block_number: Some(7),
            gas_used: None,
            status: Some(1),
            contract_address: None,
        };

        let receipt = settle_receipt(Some(polled), tx_hash, Duration::from_secs(1)).unwrap();
        assert_eq!(receipt.transaction_hash, tx_hash);
        assert_eq!(receipt.block_number, Some(7));
    }

    #[test]
    fn test_call_data_encoding() {
        let guard = address!("0x5FbDB2315678afecb367f032d93F642f64180aa3");
        let data = call_data("setAuthority(address)", &[DynSolValue::Address(guard)]).unwrap();

        assert_eq!(data.len(), 4 + 32);
        assert_eq!(&data[..4], &keccak256("setAuthority(address)")[..4]);
        assert_eq!(&data[16..], guard.as_slice());
    }

    #[test]
    fn test_call_data_rejects_wrong_arguments() {
        let err = call_data("setAuthority(address)", &[DynSolValue::Bool(true)]).unwrap_err();
        assert!(matches!(err, ChainError::Encoding(_)));
    }

    #[test]
    fn test_deploy_data_appends_constructor_args() {
        let code = Bytes::from(vec![0x60, 0x80]);
        assert_eq!(deploy_data(&code, &[]), code);

        let data = deploy_data(&code, &[DynSolValue::Uint(U256::from(7), 256)]);
        assert_eq!(data.len(), 2 + 32);
        assert_eq!(data[33], 7);
    }
}
