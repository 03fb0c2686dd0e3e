//! EC2 and Client VPN operations (Query protocol, API version 2016-11-15)

use crate::aws::client::AwsClient;
use crate::aws::error::ApiError;
use crate::aws::{EndpointSpec, IpPermission, Subnet, Vpc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;

const API_VERSION: &str = "2016-11-15";
const SERVICE: &str = "ec2";
const NAME_TAG: &str = "vpc-vpn-pivot";

/// `<fooSet><item>..</item>...</fooSet>`
#[derive(Debug, Deserialize)]
struct ItemSet<T> {
    #[serde(rename = "item", default = "Vec::new")]
    items: Vec<T>,
}

impl<T> Default for ItemSet<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

#[derive(Debug, Deserialize)]
struct DescribeSubnetsResponse {
    #[serde(rename = "subnetSet", default)]
    subnets: ItemSet<SubnetXml>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubnetXml {
    subnet_id: String,
    vpc_id: String,
    cidr_block: String,
    #[serde(default)]
    availability_zone: Option<String>,
}

impl From<SubnetXml> for Subnet {
    fn from(xml: SubnetXml) -> Self {
        Subnet {
            subnet_id: xml.subnet_id,
            vpc_id: xml.vpc_id,
            cidr_block: xml.cidr_block,
            availability_zone: xml.availability_zone,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DescribeVpcsResponse {
    #[serde(rename = "vpcSet", default)]
    vpcs: ItemSet<VpcXml>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VpcXml {
    vpc_id: String,
    cidr_block: String,
    #[serde(default)]
    dhcp_options_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DescribeDhcpOptionsResponse {
    #[serde(rename = "dhcpOptionsSet", default)]
    options: ItemSet<DhcpOptionsXml>,
}

#[derive(Debug, Deserialize)]
struct DhcpOptionsXml {
    #[serde(rename = "dhcpConfigurationSet", default)]
    configuration: ItemSet<DhcpConfigurationXml>,
}

#[derive(Debug, Deserialize)]
struct DhcpConfigurationXml {
    key: String,
    #[serde(rename = "valueSet", default)]
    values: ItemSet<DhcpValueXml>,
}

#[derive(Debug, Deserialize)]
struct DhcpValueXml {
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateClientVpnEndpointResponse {
    client_vpn_endpoint_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssociateTargetNetworkResponse {
    association_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSecurityGroupResponse {
    group_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExportClientConfigurationResponse {
    client_configuration: String,
}

fn parse<T: DeserializeOwned>(action: &str, body: &str) -> Result<T, ApiError> {
    quick_xml::de::from_str(body).map_err(|e| ApiError::malformed_response(action, e))
}

fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[derive(Debug, Clone)]
pub struct Ec2Client {
    client: AwsClient,
}

impl Ec2Client {
    pub fn new(client: AwsClient) -> Self {
        Self { client }
    }

    async fn call(&self, action: &str, params: BTreeMap<String, String>) -> Result<String, ApiError> {
        self.client.query(SERVICE, action, API_VERSION, params).await
    }

    pub async fn describe_subnets(&self, subnet_ids: &[&str]) -> Result<Vec<Subnet>, ApiError> {
        let mut p = BTreeMap::new();
        for (i, id) in subnet_ids.iter().enumerate() {
            p.insert(format!("SubnetId.{}", i + 1), id.to_string());
        }
        let body = self.call("DescribeSubnets", p).await?;
        let response: DescribeSubnetsResponse = parse("DescribeSubnets", &body)?;
        Ok(response.subnets.items.into_iter().map(Subnet::from).collect())
    }

    pub async fn describe_vpc(&self, vpc_id: &str) -> Result<Vpc, ApiError> {
        let body = self
            .call("DescribeVpcs", params(&[("VpcId.1", vpc_id)]))
            .await?;
        let response: DescribeVpcsResponse = parse("DescribeVpcs", &body)?;
        response
            .vpcs
            .items
            .into_iter()
            .next()
            .map(|xml| Vpc {
                vpc_id: xml.vpc_id,
                cidr_block: xml.cidr_block,
                dhcp_options_id: xml.dhcp_options_id,
            })
            .ok_or_else(|| {
                ApiError::new(
                    "DescribeVpcs",
                    "InvalidVpcID.NotFound",
                    &format!("The vpc ID '{}' does not exist", vpc_id),
                    400,
                )
            })
    }

    /// Values of the `domain-name-servers` option.
    pub async fn dhcp_dns_servers(&self, dhcp_options_id: &str) -> Result<Vec<String>, ApiError> {
        let body = self
            .call(
                "DescribeDhcpOptions",
                params(&[("DhcpOptionsId.1", dhcp_options_id)]),
            )
            .await?;
        let response: DescribeDhcpOptionsResponse = parse("DescribeDhcpOptions", &body)?;

        Ok(response
            .options
            .items
            .into_iter()
            .flat_map(|options| options.configuration.items)
            .filter(|config| config.key == "domain-name-servers")
            .flat_map(|config| config.values.items)
            .map(|v| v.value)
            .collect())
    }

    pub async fn create_client_vpn_endpoint(&self, spec: &EndpointSpec) -> Result<String, ApiError> {
        let mut p = params(&[
            ("ClientCidrBlock", spec.client_cidr_block.as_str()),
            ("ServerCertificateArn", spec.server_certificate_arn.as_str()),
            ("AuthenticationOptions.1.Type", "certificate-authentication"),
            (
                "AuthenticationOptions.1.MutualAuthentication.ClientRootCertificateChainArn",
                spec.client_root_certificate_arn.as_str(),
            ),
            ("ConnectionLogOptions.Enabled", "false"),
            ("TransportProtocol", spec.transport.as_str()),
            ("Description", spec.description.as_str()),
            ("TagSpecification.1.ResourceType", "client-vpn-endpoint"),
            ("TagSpecification.1.Tag.1.Key", "Name"),
            ("TagSpecification.1.Tag.1.Value", NAME_TAG),
        ]);
        for (i, server) in spec.dns_servers.iter().enumerate() {
            p.insert(format!("DnsServers.{}", i + 1), server.clone());
        }

        let body = self.call("CreateClientVpnEndpoint", p).await?;
        let response: CreateClientVpnEndpointResponse = parse("CreateClientVpnEndpoint", &body)?;
        Ok(response.client_vpn_endpoint_id)
    }

    pub async fn delete_client_vpn_endpoint(&self, endpoint_id: &str) -> Result<(), ApiError> {
        self.call(
            "DeleteClientVpnEndpoint",
            params(&[("ClientVpnEndpointId", endpoint_id)]),
        )
        .await
        .map(|_| ())
    }

    pub async fn associate_target_network(
        &self,
        endpoint_id: &str,
        subnet_id: &str,
    ) -> Result<String, ApiError> {
        let body = self
            .call(
                "AssociateClientVpnTargetNetwork",
                params(&[("ClientVpnEndpointId", endpoint_id), ("SubnetId", subnet_id)]),
            )
            .await?;
        let response: AssociateTargetNetworkResponse =
            parse("AssociateClientVpnTargetNetwork", &body)?;
        Ok(response.association_id)
    }

    pub async fn disassociate_target_network(
        &self,
        endpoint_id: &str,
        association_id: &str,
    ) -> Result<(), ApiError> {
        self.call(
            "DisassociateClientVpnTargetNetwork",
            params(&[
                ("ClientVpnEndpointId", endpoint_id),
                ("AssociationId", association_id),
            ]),
        )
        .await
        .map(|_| ())
    }

    pub async fn create_client_vpn_route(
        &self,
        endpoint_id: &str,
        destination_cidr: &str,
        subnet_id: &str,
    ) -> Result<(), ApiError> {
        self.call(
            "CreateClientVpnRoute",
            params(&[
                ("ClientVpnEndpointId", endpoint_id),
                ("DestinationCidrBlock", destination_cidr),
                ("TargetVpcSubnetId", subnet_id),
                ("Description", "Default route through the target subnet"),
            ]),
        )
        .await
        .map(|_| ())
    }

    pub async fn delete_client_vpn_route(
        &self,
        endpoint_id: &str,
        destination_cidr: &str,
        subnet_id: &str,
    ) -> Result<(), ApiError> {
        self.call(
            "DeleteClientVpnRoute",
            params(&[
                ("ClientVpnEndpointId", endpoint_id),
                ("DestinationCidrBlock", destination_cidr),
                ("TargetVpcSubnetId", subnet_id),
            ]),
        )
        .await
        .map(|_| ())
    }

    pub async fn authorize_client_vpn_ingress(
        &self,
        endpoint_id: &str,
        target_cidr: &str,
    ) -> Result<(), ApiError> {
        self.call(
            "AuthorizeClientVpnIngress",
            params(&[
                ("ClientVpnEndpointId", endpoint_id),
                ("TargetNetworkCidr", target_cidr),
                ("AuthorizeAllGroups", "true"),
            ]),
        )
        .await
        .map(|_| ())
    }

    pub async fn revoke_client_vpn_ingress(
        &self,
        endpoint_id: &str,
        target_cidr: &str,
    ) -> Result<(), ApiError> {
        self.call(
            "RevokeClientVpnIngress",
            params(&[
                ("ClientVpnEndpointId", endpoint_id),
                ("TargetNetworkCidr", target_cidr),
                ("RevokeAllGroups", "true"),
            ]),
        )
        .await
        .map(|_| ())
    }

    pub async fn create_security_group(
        &self,
        vpc_id: &str,
        name: &str,
        description: &str,
    ) -> Result<String, ApiError> {
        let body = self
            .call(
                "CreateSecurityGroup",
                params(&[
                    ("VpcId", vpc_id),
                    ("GroupName", name),
                    ("GroupDescription", description),
                    ("TagSpecification.1.ResourceType", "security-group"),
                    ("TagSpecification.1.Tag.1.Key", "Name"),
                    ("TagSpecification.1.Tag.1.Value", NAME_TAG),
                ]),
            )
            .await?;
        let response: CreateSecurityGroupResponse = parse("CreateSecurityGroup", &body)?;
        Ok(response.group_id)
    }

    pub async fn authorize_security_group_ingress(
        &self,
        group_id: &str,
        permissions: &[IpPermission],
    ) -> Result<(), ApiError> {
        let mut p = params(&[("GroupId", group_id)]);
        for (i, perm) in permissions.iter().enumerate() {
            let prefix = format!("IpPermissions.{}", i + 1);
            p.insert(format!("{}.IpProtocol", prefix), perm.protocol.clone());
            p.insert(format!("{}.FromPort", prefix), perm.from_port.to_string());
            p.insert(format!("{}.ToPort", prefix), perm.to_port.to_string());
            p.insert(format!("{}.IpRanges.1.CidrIp", prefix), perm.cidr.clone());
        }
        self.call("AuthorizeSecurityGroupIngress", p).await.map(|_| ())
    }

    pub async fn delete_security_group(&self, group_id: &str) -> Result<(), ApiError> {
        self.call("DeleteSecurityGroup", params(&[("GroupId", group_id)]))
            .await
            .map(|_| ())
    }

    pub async fn apply_security_group(
        &self,
        endpoint_id: &str,
        vpc_id: &str,
        group_id: &str,
    ) -> Result<(), ApiError> {
        self.call(
            "ApplySecurityGroupsToClientVpnTargetNetwork",
            params(&[
                ("ClientVpnEndpointId", endpoint_id),
                ("VpcId", vpc_id),
                ("SecurityGroupId.1", group_id),
            ]),
        )
        .await
        .map(|_| ())
    }

    pub async fn export_client_configuration(&self, endpoint_id: &str) -> Result<String, ApiError> {
        let body = self
            .call(
                "ExportClientVpnClientConfiguration",
                params(&[("ClientVpnEndpointId", endpoint_id)]),
            )
            .await?;
        let response: ExportClientConfigurationResponse =
            parse("ExportClientVpnClientConfiguration", &body)?;
        Ok(response.client_configuration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_describe_subnets() {
        let body = r#"<?xml version="1.0" encoding="UTF-8"?>
<DescribeSubnetsResponse xmlns="http://ec2.amazonaws.com/doc/2016-11-15/">
    <requestId>7a62c49f-347e-4fc4-9331-6e8eEXAMPLE</requestId>
    <subnetSet>
        <item>
            <subnetId>subnet-0d326f29e157a5b79</subnetId>
            <state>available</state>
            <vpcId>vpc-079cac0a61aaac7a7</vpcId>
            <cidrBlock>10.0.1.0/24</cidrBlock>
            <ipv6CidrBlockAssociationSet/>
            <availableIpAddressCount>251</availableIpAddressCount>
            <availabilityZone>us-east-1a</availabilityZone>
            <tagSet>
                <item><key>Name</key><value>private-a</value></item>
            </tagSet>
        </item>
        <item>
            <subnetId>subnet-27f3c340</subnetId>
            <vpcId>vpc-7128c20c</vpcId>
            <cidrBlock>172.31.0.0/20</cidrBlock>
        </item>
    </subnetSet>
</DescribeSubnetsResponse>"#;

        let response: DescribeSubnetsResponse = parse("DescribeSubnets", body).unwrap();
        let subnets: Vec<Subnet> = response.subnets.items.into_iter().map(Subnet::from).collect();

        assert_eq!(subnets.len(), 2);
        assert_eq!(subnets[0].subnet_id, "subnet-0d326f29e157a5b79");
        assert_eq!(subnets[0].vpc_id, "vpc-079cac0a61aaac7a7");
        assert_eq!(subnets[0].cidr_block, "10.0.1.0/24");
        assert_eq!(subnets[0].availability_zone.as_deref(), Some("us-east-1a"));
        assert_eq!(subnets[1].availability_zone, None);
    }

    #[test]
    fn test_parse_empty_subnet_set() {
        let body = r#"<DescribeSubnetsResponse><requestId>1</requestId><subnetSet/></DescribeSubnetsResponse>"#;
        let response: DescribeSubnetsResponse = parse("DescribeSubnets", body).unwrap();
        assert!(response.subnets.items.is_empty());
    }

    #[test]
    fn test_parse_describe_vpcs() {
        let body = r#"<DescribeVpcsResponse xmlns="http://ec2.amazonaws.com/doc/2016-11-15/">
  <requestId>1</requestId>
  <vpcSet>
    <item>
      <vpcId>vpc-7128c20c</vpcId>
      <state>available</state>
      <cidrBlock>172.31.0.0/16</cidrBlock>
      <dhcpOptionsId>dopt-19edf471</dhcpOptionsId>
      <isDefault>true</isDefault>
    </item>
  </vpcSet>
</DescribeVpcsResponse>"#;

        let response: DescribeVpcsResponse = parse("DescribeVpcs", body).unwrap();
        let vpc = &response.vpcs.items[0];
        assert_eq!(vpc.vpc_id, "vpc-7128c20c");
        assert_eq!(vpc.cidr_block, "172.31.0.0/16");
        assert_eq!(vpc.dhcp_options_id.as_deref(), Some("dopt-19edf471"));
    }

    #[test]
    fn test_parse_dhcp_options() {
        let body = r#"<DescribeDhcpOptionsResponse xmlns="http://ec2.amazonaws.com/doc/2016-11-15/">
  <requestId>1</requestId>
  <dhcpOptionsSet>
    <item>
      <dhcpOptionsId>dopt-19edf471</dhcpOptionsId>
      <dhcpConfigurationSet>
        <item>
          <key>domain-name</key>
          <valueSet><item><value>ec2.internal</value></item></valueSet>
        </item>
        <item>
          <key>domain-name-servers</key>
          <valueSet>
            <item><value>10.2.5.1</value></item>
            <item><value>10.2.5.2</value></item>
          </valueSet>
        </item>
      </dhcpConfigurationSet>
    </item>
  </dhcpOptionsSet>
</DescribeDhcpOptionsResponse>"#;

        let response: DescribeDhcpOptionsResponse = parse("DescribeDhcpOptions", body).unwrap();
        let servers: Vec<String> = response
            .options
            .items
            .into_iter()
            .flat_map(|o| o.configuration.items)
            .filter(|c| c.key == "domain-name-servers")
            .flat_map(|c| c.values.items)
            .map(|v| v.value)
            .collect();
        assert_eq!(servers, vec!["10.2.5.1", "10.2.5.2"]);
    }

    #[test]
    fn test_parse_create_endpoint() {
        let body = r#"<CreateClientVpnEndpointResponse xmlns="http://ec2.amazonaws.com/doc/2016-11-15/">
    <requestId>1</requestId>
    <clientVpnEndpointId>cvpn-endpoint-00c5d11fc4EXAMPLE</clientVpnEndpointId>
    <status><code>pending-associate</code></status>
    <dnsName>*.cvpn-endpoint-00c5d11fc4EXAMPLE.prod.clientvpn.us-east-1.amazonaws.com</dnsName>
</CreateClientVpnEndpointResponse>"#;

        let response: CreateClientVpnEndpointResponse =
            parse("CreateClientVpnEndpoint", body).unwrap();
        assert_eq!(
            response.client_vpn_endpoint_id,
            "cvpn-endpoint-00c5d11fc4EXAMPLE"
        );
    }

    #[test]
    fn test_parse_export_configuration_unescapes() {
        let body = r#"<ExportClientVpnClientConfigurationResponse>
    <requestId>1</requestId>
    <clientConfiguration>client
dev tun
remote cvpn-endpoint-1.prod.clientvpn.us-east-1.amazonaws.com 443
&lt;ca&gt;
-----BEGIN CERTIFICATE-----
&lt;/ca&gt;
</clientConfiguration>
</ExportClientVpnClientConfigurationResponse>"#;

        let response: ExportClientConfigurationResponse =
            parse("ExportClientVpnClientConfiguration", body).unwrap();
        assert!(response.client_configuration.starts_with("client\ndev tun"));
        assert!(response.client_configuration.contains("<ca>"));
    }

    #[test]
    fn test_malformed_response() {
        let err = parse::<CreateSecurityGroupResponse>("CreateSecurityGroup", "<nope/>")
            .unwrap_err();
        assert_eq!(err.code, "MalformedResponse");
    }
}
