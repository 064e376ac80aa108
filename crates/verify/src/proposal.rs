//! Governance proposals of a release and the initialization data they are checked against.

use alloy_dyn_abi::{DynSolType, DynSolValue, JsonAbiExt, Specifier};
use alloy_json_abi::Function;
use alloy_primitives::{hex, Address, Bytes};
use bytecode_verify_artifacts_solc::ArtifactRepository;
use bytecode_verify_core::{utils::parse_address, InitializationError, Result, VerifyError};
use serde::{Deserialize, Deserializer, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

pub const PROXY_SUFFIX: &str = "Proxy";
pub const REGISTRY: &str = "Registry";
pub const SET_IMPLEMENTATION: &str = "_setImplementation";
pub const SET_AND_INITIALIZE_IMPLEMENTATION: &str = "_setAndInitializeImplementation";
pub const SET_ADDRESS_FOR: &str = "setAddressFor";

/// A single transaction of a proposal file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalTx {
    pub contract: String,
    pub function: String,
    #[serde(default, deserialize_with = "deserialize_args")]
    pub args: Vec<String>,
    #[serde(default)]
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Arguments are strings, other JSON values are kept as their JSON text.
fn deserialize_args<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Vec<String>, D::Error> {
    let values = Vec::<serde_json::Value>::deserialize(d)?;
    Ok(values
        .into_iter()
        .map(|value| match value {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        })
        .collect())
}

impl ProposalTx {
    /// The contract behind a `<Name>Proxy`, if this targets a proxy.
    pub fn proxied_contract(&self) -> Option<&str> {
        self.contract.strip_suffix(PROXY_SUFFIX)
    }

    pub fn is_proxy_repoint(&self) -> bool {
        self.proxied_contract().is_some()
            && (self.function == SET_IMPLEMENTATION
                || self.function == SET_AND_INITIALIZE_IMPLEMENTATION)
    }

    pub fn is_proxy_repoint_and_initialize(&self) -> bool {
        self.proxied_contract().is_some() && self.function == SET_AND_INITIALIZE_IMPLEMENTATION
    }

    pub fn is_registry_repoint(&self) -> bool {
        self.contract == REGISTRY && self.function == SET_ADDRESS_FOR
    }

    fn arg(&self, index: usize, what: &str) -> std::result::Result<&str, String> {
        self.args.get(index).map(String::as_str).ok_or_else(|| format!("missing {what}"))
    }

    fn address_arg(&self, index: usize, what: &str) -> std::result::Result<Address, String> {
        parse_address(self.arg(index, what)?).map_err(|err| err.to_string())
    }

    fn action(&self) -> std::result::Result<ReleaseAction, String> {
        if self.is_proxy_repoint() {
            let contract = self.proxied_contract().unwrap_or_default();
            if contract.is_empty() {
                return Err("can't derive contract name".to_string());
            }
            let implementation = self.address_arg(0, "implementation address")?;
            let initialize = if self.is_proxy_repoint_and_initialize() {
                let calldata = self.arg(1, "initialization calldata")?;
                Some(hex::decode(calldata).map_err(|err| format!("invalid calldata: {err}"))?.into())
            } else {
                None
            };
            Ok(ReleaseAction::ProxyRepoint { contract: contract.to_string(), implementation, initialize })
        } else if self.is_registry_repoint() {
            let contract = self.arg(0, "registry id")?.to_string();
            let proxy = self.address_arg(1, "proxy address")?;
            Ok(ReleaseAction::RegistryRepoint { contract, proxy })
        } else {
            Err("neither a proxy nor a registry repoint".to_string())
        }
    }
}

impl fmt::Display for ProposalTx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}({})", self.contract, self.function, self.args.join(", "))
    }
}

/// The effect of a valid proposal transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReleaseAction {
    /// `<contract>Proxy._setImplementation` or `_setAndInitializeImplementation`.
    ProxyRepoint { contract: String, implementation: Address, initialize: Option<Bytes> },
    /// `Registry.setAddressFor(contract, proxy)`.
    RegistryRepoint { contract: String, proxy: Address },
}

/// A validated proposal, answers how it changes on-chain state once executed.
///
/// If several transactions touch the same contract the first one counts.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Proposal {
    actions: Vec<ReleaseAction>,
}

impl Proposal {
    /// Validates the transactions, every one has to be a proxy or registry repoint.
    pub fn new(txs: &[ProposalTx]) -> Result<Self> {
        let mut actions = Vec::with_capacity(txs.len());
        let mut invalid = Vec::new();
        for tx in txs {
            match tx.action() {
                Ok(action) => actions.push(action),
                Err(reason) => invalid.push(format!("{tx}: {reason}")),
            }
        }
        if !invalid.is_empty() {
            return Err(VerifyError::InvalidProposal(invalid));
        }
        debug!(transactions = actions.len(), "proposal contains only valid release transactions");
        Ok(Self { actions })
    }

    pub fn validate(txs: &[ProposalTx]) -> Result<()> {
        Self::new(txs).map(drop)
    }

    pub fn actions(&self) -> &[ReleaseAction] {
        &self.actions
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Whether the registry entry of `contract` is pointed at a new proxy.
    pub fn is_proxy_changed(&self, contract: &str) -> bool {
        self.proposed_proxy_address(contract).is_some()
    }

    pub fn proposed_proxy_address(&self, contract: &str) -> Option<Address> {
        self.actions.iter().find_map(|action| match action {
            ReleaseAction::RegistryRepoint { contract: c, proxy } if c == contract => Some(*proxy),
            _ => None,
        })
    }

    /// Whether the proxy of `contract` is pointed at a new implementation.
    pub fn is_implementation_changed(&self, contract: &str) -> bool {
        self.proposed_implementation_address(contract).is_some()
    }

    pub fn proposed_implementation_address(&self, contract: &str) -> Option<Address> {
        self.actions.iter().find_map(|action| match action {
            ReleaseAction::ProxyRepoint { contract: c, implementation, .. } if c == contract => {
                Some(*implementation)
            }
            _ => None,
        })
    }

    /// Contracts initialized by the proposal and the calldata they are initialized with.
    pub fn initializations(&self) -> impl Iterator<Item = (&str, &Bytes)> + '_ {
        self.actions.iter().filter_map(|action| match action {
            ReleaseAction::ProxyRepoint { contract, initialize: Some(calldata), .. } => {
                Some((contract.as_str(), calldata))
            }
            _ => None,
        })
    }
}

/// Positional `initialize` arguments per contract, as kept next to a release.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InitializationData(pub BTreeMap<String, Vec<serde_json::Value>>);

impl InitializationData {
    pub fn get(&self, contract: &str) -> Option<&[serde_json::Value]> {
        self.0.get(contract).map(Vec::as_slice)
    }

    pub fn contracts(&self) -> impl Iterator<Item = &str> + '_ {
        self.0.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, Vec<serde_json::Value>)> for InitializationData {
    fn from_iter<I: IntoIterator<Item = (String, Vec<serde_json::Value>)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Checks that the initialization data and the proposal describe the same initializations.
///
/// Every initializing transaction needs an entry whose encoded `initialize` call equals the
/// proposed calldata, and every entry needs an initializing transaction.
pub fn validate_initialization_data(
    proposal: &Proposal,
    data: &InitializationData,
    artifacts: &ArtifactRepository,
) -> Result<()> {
    let mut initialized = BTreeSet::new();
    for (contract, calldata) in proposal.initializations() {
        let args =
            data.get(contract).ok_or_else(|| InitializationError::Missing(contract.to_string()))?;
        let initializer = artifacts
            .get(contract)?
            .initializer()
            .ok_or_else(|| InitializationError::MissingInitializer(contract.to_string()))?;
        let encoded = encode_function_call(initializer, args).map_err(|reason| {
            InitializationError::Encoding { contract: contract.to_string(), reason }
        })?;
        if encoded != *calldata {
            debug!(contract, %encoded, %calldata, "initialization calldata differs");
            return Err(InitializationError::CalldataMismatch(contract.to_string()).into());
        }
        initialized.insert(contract);
    }

    if let Some(stale) = data.contracts().find(|c| !initialized.contains(c)) {
        return Err(InitializationError::Stale(stale.to_string()).into());
    }
    debug!(contracts = initialized.len(), "initialization data verified");
    Ok(())
}

/// ABI encodes a call of `function` with JSON arguments, selector included.
pub fn encode_function_call(
    function: &Function,
    args: &[serde_json::Value],
) -> std::result::Result<Bytes, String> {
    if function.inputs.len() != args.len() {
        return Err(format!(
            "{} expects {} arguments, got {}",
            function.name,
            function.inputs.len(),
            args.len()
        ));
    }
    let values = function
        .inputs
        .iter()
        .zip(args)
        .map(|(param, arg)| {
            let ty: DynSolType = param.resolve().map_err(|err| err.to_string())?;
            json_to_sol(&ty, arg).map_err(|err| format!("argument {}: {err}", param.name))
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;
    function.abi_encode_input(&values).map(Into::into).map_err(|err| err.to_string())
}

fn json_to_sol(ty: &DynSolType, value: &serde_json::Value) -> std::result::Result<DynSolValue, String> {
    use serde_json::Value;

    let items = |inner: &DynSolType, items: &[Value]| {
        items.iter().map(|item| json_to_sol(inner, item)).collect::<std::result::Result<Vec<_>, _>>()
    };
    match (ty, value) {
        (DynSolType::Array(inner), Value::Array(values)) => Ok(DynSolValue::Array(items(inner, values)?)),
        (DynSolType::FixedArray(inner, len), Value::Array(values)) if values.len() == *len => {
            Ok(DynSolValue::FixedArray(items(inner, values)?))
        }
        (DynSolType::Tuple(types), Value::Array(values)) if values.len() == types.len() => types
            .iter()
            .zip(values)
            .map(|(ty, value)| json_to_sol(ty, value))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(DynSolValue::Tuple),
        (_, Value::String(s)) => ty.coerce_str(s).map_err(|err| err.to_string()),
        (_, Value::Number(_) | Value::Bool(_)) => {
            ty.coerce_str(&value.to_string()).map_err(|err| err.to_string())
        }
        _ => Err(format!("can't convert {value} to {ty}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytecode_verify_artifacts_solc::{Artifact, ArtifactSet};
    use serde_json::json;

    fn tx(contract: &str, function: &str, args: &[&str]) -> ProposalTx {
        ProposalTx {
            contract: contract.to_string(),
            function: function.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            value: "0".to_string(),
            description: None,
        }
    }

    const IMPL: &str = "0x00000000000000000000000000000000000000aa";
    const PROXY: &str = "0x00000000000000000000000000000000000000cc";

    fn initializable(name: &str) -> ArtifactRepository {
        let artifact = Artifact::from_json(
            name,
            json!({
                "abi": [{
                    "type": "function", "name": "initialize", "stateMutability": "nonpayable",
                    "inputs": [
                        { "name": "registryAddress", "type": "address" },
                        { "name": "limit", "type": "uint256" },
                        { "name": "members", "type": "address[]" }
                    ],
                    "outputs": []
                }],
                "deployedBytecode": "0x6001"
            }),
        )
        .unwrap();
        let mut set = ArtifactSet::new("out");
        set.insert(artifact);
        ArtifactRepository::new(vec![set])
    }

    fn init_args() -> Vec<serde_json::Value> {
        vec![json!("0x000000000000000000000000000000000000ce10"), json!(5), json!([PROXY])]
    }

    fn init_calldata(artifacts: &ArtifactRepository, name: &str) -> String {
        let function = artifacts.get(name).unwrap().initializer().unwrap();
        hex::encode_prefixed(encode_function_call(function, &init_args()).unwrap())
    }

    #[test]
    fn can_deserialize_proposal() {
        let txs: Vec<ProposalTx> = serde_json::from_str(
            r#"[
                {"contract": "FooProxy", "function": "_setImplementation", "args": ["0x00000000000000000000000000000000000000aa"], "value": "0", "description": "Registry: Foo"},
                {"contract": "Registry", "function": "setAddressFor", "args": ["Foo", "0x00000000000000000000000000000000000000cc"], "value": "0"}
            ]"#,
        )
        .unwrap();
        let proposal = Proposal::new(&txs).unwrap();
        assert_eq!(proposal.proposed_implementation_address("Foo"), Some(IMPL.parse().unwrap()));
        assert_eq!(proposal.proposed_proxy_address("Foo"), Some(PROXY.parse().unwrap()));
        assert!(!proposal.is_implementation_changed("Bar"));
        assert!(!proposal.is_proxy_changed("Bar"));
    }

    #[test]
    fn rejects_unrelated_transactions() {
        let txs = [
            tx("FooProxy", SET_IMPLEMENTATION, &[IMPL]),
            tx("Exchange", "setSpread", &["5"]),
            tx("Registry", "removeAddressFor", &["Foo"]),
        ];
        match Proposal::new(&txs).unwrap_err() {
            VerifyError::InvalidProposal(invalid) => {
                assert_eq!(invalid.len(), 2);
                assert!(invalid[0].starts_with("Exchange.setSpread(5)"));
            }
            err => panic!("unexpected error: {err}"),
        }
    }

    #[test]
    fn rejects_malformed_repoints() {
        for tx in [
            tx("Proxy", SET_IMPLEMENTATION, &[IMPL]),
            tx("FooProxy", SET_IMPLEMENTATION, &[]),
            tx("FooProxy", SET_IMPLEMENTATION, &["Foo"]),
            tx("FooProxy", SET_AND_INITIALIZE_IMPLEMENTATION, &[IMPL, "0xzz"]),
            tx("Registry", SET_ADDRESS_FOR, &["Foo"]),
        ] {
            assert!(Proposal::validate(&[tx.clone()]).is_err(), "{tx}");
        }
    }

    #[test]
    fn implementation_changes_apply_to_proxied_name_only() {
        let proposal = Proposal::new(&[tx("FooProxy", SET_IMPLEMENTATION, &[IMPL])]).unwrap();
        assert!(proposal.is_implementation_changed("Foo"));
        assert!(!proposal.is_implementation_changed("FooProxy"));
        assert!(!proposal.is_proxy_changed("Foo"));
        assert_eq!(proposal.initializations().count(), 0);
    }

    #[test]
    fn accepts_matching_initialization_data() {
        let artifacts = initializable("Foo");
        let calldata = init_calldata(&artifacts, "Foo").to_uppercase().replacen("0X", "0x", 1);
        let proposal =
            Proposal::new(&[tx("FooProxy", SET_AND_INITIALIZE_IMPLEMENTATION, &[IMPL, &calldata])])
                .unwrap();
        let data = InitializationData::from_iter([("Foo".to_string(), init_args())]);
        validate_initialization_data(&proposal, &data, &artifacts).unwrap();
    }

    #[test]
    fn stale_initialization_data_is_an_error() {
        let artifacts = initializable("Foo");
        let proposal = Proposal::new(&[tx("FooProxy", SET_IMPLEMENTATION, &[IMPL])]).unwrap();
        let data = InitializationData::from_iter([("Foo".to_string(), init_args())]);

        let err = validate_initialization_data(&proposal, &data, &artifacts).unwrap_err();
        assert!(err.to_string().contains("stale initialization data"), "{err}");
        assert!(matches!(
            err,
            VerifyError::InitializationMismatch(InitializationError::Stale(name)) if name == "Foo"
        ));
    }

    #[test]
    fn missing_initialization_data_is_an_error() {
        let artifacts = initializable("Bar");
        let calldata = init_calldata(&artifacts, "Bar");
        let proposal =
            Proposal::new(&[tx("BarProxy", SET_AND_INITIALIZE_IMPLEMENTATION, &[IMPL, &calldata])])
                .unwrap();

        let err =
            validate_initialization_data(&proposal, &InitializationData::default(), &artifacts)
                .unwrap_err();
        assert!(matches!(
            err,
            VerifyError::InitializationMismatch(InitializationError::Missing(name)) if name == "Bar"
        ));
    }

    #[test]
    fn differing_calldata_is_an_error() {
        let artifacts = initializable("Foo");
        let calldata = init_calldata(&artifacts, "Foo");
        let proposal =
            Proposal::new(&[tx("FooProxy", SET_AND_INITIALIZE_IMPLEMENTATION, &[IMPL, &calldata])])
                .unwrap();
        let mut args = init_args();
        args[1] = json!("6");
        let data = InitializationData::from_iter([("Foo".to_string(), args)]);

        let err = validate_initialization_data(&proposal, &data, &artifacts).unwrap_err();
        assert!(matches!(
            err,
            VerifyError::InitializationMismatch(InitializationError::CalldataMismatch(_))
        ));
    }

    #[test]
    fn encodes_initialize_call() {
        let function = Function::parse("function initialize(address r, uint256 n, bool b)").unwrap();
        let args = [json!("0x000000000000000000000000000000000000ce10"), json!("1000"), json!(true)];
        let encoded = encode_function_call(&function, &args).unwrap();
        assert_eq!(encoded.len(), 4 + 3 * 32);
        assert_eq!(&encoded[..4], function.selector().as_slice());
        assert_eq!(encoded[4 + 32 + 30..4 + 64], [0x03, 0xe8]);
        assert_eq!(encoded[4 + 95], 1);

        assert!(encode_function_call(&function, &args[..2]).is_err());
        assert!(encode_function_call(&function, &[json!("zz"), json!(1), json!(true)]).is_err());
    }
}
